/// Log Classification Service
///
/// Routes each log line through a three-stage waterfall (regex patterns,
/// embedding classifier, LLM fallback) and exposes the results over HTTP.
/// Port: 8000

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use log_classifier::config::Config;
use log_classifier::csv_io;
use log_classifier::embedding_classifier::EmbeddingClassifier;
use log_classifier::job_store::{self, JobStore};
use log_classifier::llm_classifier::LlmClassifier;
use log_classifier::metrics::{Metrics, MetricsSnapshot};
use log_classifier::orchestrator::{
    ClassificationResult, LogEntry, Orchestrator, RoutingPolicy,
};
use log_classifier::pattern_matcher::PatternMatcher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

const JOB_CHUNK_SIZE: usize = 100;

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    patterns: Arc<PatternMatcher>,
    jobs: Arc<JobStore>,
    metrics: Arc<Metrics>,
    llm_provider: String,
}

impl AppState {
    fn new(config: &Config) -> anyhow::Result<Self> {
        // Pattern rules: file if configured, built-in set otherwise
        let patterns = Arc::new(match &config.pattern_rules_file {
            Some(path) => PatternMatcher::from_file(path)?,
            None => PatternMatcher::with_default_rules(),
        });
        info!("Pattern rules loaded: {}", patterns.rule_count());

        // Model artifacts must load at startup; a broken model directory is
        // fatal here rather than a per-request error later.
        let embedding = Arc::new(EmbeddingClassifier::load(&config.model_dir)?);
        info!("Embedding classifier loaded from {}", config.model_dir);

        let llm = Arc::new(LlmClassifier::new(config)?);

        let metrics = Arc::new(Metrics::new());
        let policy = RoutingPolicy {
            confidence_threshold: config.confidence_threshold,
            legacy_sources: config.legacy_sources.clone(),
            max_concurrency: config.max_concurrency,
            batch_timeout: config.batch_timeout,
        };

        let orchestrator = Arc::new(Orchestrator::new(
            patterns.clone(),
            embedding,
            llm,
            policy,
            metrics.clone(),
        ));

        Ok(Self {
            orchestrator,
            patterns,
            jobs: JobStore::new(),
            metrics,
            llm_provider: config.llm_provider.clone(),
        })
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Unified request structure - accepts single log or batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UnifiedClassifyRequest {
    Single(LogEntry),
    Batch { logs: Vec<LogEntry> },
}

#[derive(Debug, Serialize)]
struct ClassifyResponse {
    total: usize,
    results: Vec<ClassificationResult>,
}

#[derive(Debug, Serialize)]
struct JobCreatedResponse {
    job_id: Uuid,
    status: &'static str,
    total: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    pattern_rules: usize,
    embedding_model: &'static str,
    llm_provider: String,
    active_jobs: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// Service info
async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "log-classifier",
        "version": env!("CARGO_PKG_VERSION"),
        "llm_provider": state.llm_provider,
        "health": "/health",
        "metrics": "/metrics",
    }))
}

/// Health check
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        pattern_rules: state.patterns.rule_count(),
        embedding_model: "loaded", // load is fatal at startup, so always true here
        llm_provider: state.llm_provider.clone(),
        active_jobs: state.jobs.job_count().await,
    })
}

/// Classification metrics
async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Unified classify endpoint - accepts single log or batch
async fn classify(
    State(state): State<AppState>,
    Json(req): Json<UnifiedClassifyRequest>,
) -> Result<Json<ClassifyResponse>, (StatusCode, Json<ErrorResponse>)> {
    let entries = match req {
        UnifiedClassifyRequest::Single(entry) => vec![entry],
        UnifiedClassifyRequest::Batch { logs } => logs,
    };

    if entries.is_empty() {
        return Ok(Json(ClassifyResponse {
            total: 0,
            results: vec![],
        }));
    }

    info!("Classifying {} log(s)", entries.len());
    let results = state.orchestrator.classify_batch(entries).await;

    Ok(Json(ClassifyResponse {
        total: results.len(),
        results,
    }))
}

/// CSV upload endpoint - creates a background job
async fn classify_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobCreatedResponse>), (StatusCode, Json<ErrorResponse>)> {
    let mut data = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, format!("invalid multipart body: {e}"))
    })? {
        if field.name() == Some("file") {
            data = Some(field.bytes().await.map_err(|e| {
                error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("failed to read upload: {e}"),
                )
            })?);
            break;
        }
    }

    let data = data.ok_or_else(|| {
        error_response(StatusCode::BAD_REQUEST, "multipart field 'file' is required")
    })?;

    let entries = csv_io::parse_entries(&data)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    if entries.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "CSV contains no log entries",
        ));
    }

    let total = entries.len();
    let job_id = state.jobs.create(total).await;
    info!("Created job {} with {} entries", job_id, total);

    tokio::spawn(job_store::run_job(
        state.orchestrator.clone(),
        state.jobs.clone(),
        job_id,
        entries,
        JOB_CHUNK_SIZE,
    ));

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id,
            status: "pending",
            total,
        }),
    ))
}

/// Job status for dashboard polling
async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    match state.jobs.get(job_id).await {
        Some(job) => Ok(Json(job)),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("no such job: {job_id}"),
        )),
    }
}

/// Download completed job results as CSV
async fn job_download(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let job = state.jobs.get(job_id).await.ok_or_else(|| {
        error_response(StatusCode::NOT_FOUND, format!("no such job: {job_id}"))
    })?;

    let csv = csv_io::write_results(&job.results).map_err(|e| {
        error!("Failed to render job {} as CSV: {}", job_id, e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to render CSV")
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"classified_{job_id}.csv\""),
            ),
        ],
        csv,
    ))
}

// ============================================================================
// Main Application
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (fails silently if not found)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Log Classification Service");

    let config = Config::from_env()?;
    config.log_config();

    if config.llm_api_key.is_empty() && config.llm_provider != "ollama" {
        warn!("LLM_API_KEY is empty; the LLM fallback stage will fail closed");
    }

    let state = AppState::new(&config)?;

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/classify", post(classify))
        .route("/classify/csv", post(classify_csv))
        .route("/jobs/:job_id", get(job_status))
        .route("/jobs/:job_id/download", get(job_download))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("🚀 Log Classification Service listening on {}", addr);
    info!("");
    info!("📊 Endpoints:");
    info!("   GET  /health              - Health check");
    info!("   GET  /metrics             - Classification metrics");
    info!("   POST /classify            - Classify single log or batch (JSON)");
    info!("   POST /classify/csv        - Upload CSV, returns job id");
    info!("   GET  /jobs/:id            - Job status for polling");
    info!("   GET  /jobs/:id/download   - Completed results as CSV");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
