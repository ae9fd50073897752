/// Classification orchestrator with waterfall routing
///
/// Routes each log entry through up to three stages, cheapest first:
///   1. pattern matching (regex, ~microseconds)
///   2. embedding classifier (local model, ~milliseconds)
///   3. LLM fallback (remote API, slow and billable)
///
/// The chain short-circuits on the first accepted label. Entries tagged with
/// a legacy source skip straight to the LLM; their logs are too irregular
/// for the rule and embedding stages.
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::metrics::Metrics;
use crate::pattern_matcher::PatternMatcher;
use crate::traits::{FallbackClassifier, VectorClassifier};

/// Terminal label for entries no stage could classify.
pub const UNCLASSIFIED_LABEL: &str = "Unclassified";

/// A single input record. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub log_message: String,
}

impl LogEntry {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: None,
            source: Some(source.into()),
            log_message: message.into(),
        }
    }
}

/// Which stage produced the final label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStage {
    Pattern,
    Embedding,
    Llm,
    /// No stage produced a label (stage error or batch timeout).
    Unclassified,
}

/// Output for one `LogEntry`. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub log_message: String,
    pub target_label: String,
    pub stage: ClassificationStage,
    /// Set only when the embedding stage produced the label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub processing_time_ms: f64,
}

/// Routing policy inputs. Read-only after startup.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    /// Minimum embedding confidence to accept without LLM fallback.
    pub confidence_threshold: f32,
    /// Sources routed directly to the LLM stage.
    pub legacy_sources: Vec<String>,
    /// Upper bound on concurrently processed batch entries.
    pub max_concurrency: usize,
    /// Wall-clock bound for a whole batch; late entries are marked failed.
    pub batch_timeout: Duration,
}

impl RoutingPolicy {
    pub fn is_legacy_source(&self, source: Option<&str>) -> bool {
        match source {
            Some(s) => self.legacy_sources.iter().any(|l| l == s),
            None => false,
        }
    }
}

pub struct Orchestrator {
    patterns: Arc<PatternMatcher>,
    embedding: Arc<dyn VectorClassifier>,
    llm: Arc<dyn FallbackClassifier>,
    policy: RoutingPolicy,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        patterns: Arc<PatternMatcher>,
        embedding: Arc<dyn VectorClassifier>,
        llm: Arc<dyn FallbackClassifier>,
        policy: RoutingPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            patterns,
            embedding,
            llm,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Classify one entry. Infallible by contract: every entry yields exactly
    /// one result, with the terminal label standing in for stage failures.
    pub async fn classify_entry(&self, entry: &LogEntry) -> ClassificationResult {
        let start = Instant::now();
        let (label, stage, confidence) = self.run_stages(entry).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.metrics
            .record(stage, elapsed_ms, stage == ClassificationStage::Unclassified);

        tracing::debug!(
            "Classified [{:?}] '{}' -> '{}'",
            stage,
            entry.log_message,
            label
        );

        ClassificationResult {
            id: entry.id.clone(),
            source: entry.source.clone(),
            log_message: entry.log_message.clone(),
            target_label: label,
            stage,
            confidence,
            processing_time_ms: elapsed_ms,
        }
    }

    async fn run_stages(&self, entry: &LogEntry) -> (String, ClassificationStage, Option<f32>) {
        let source = entry.source.as_deref();

        // Legacy-origin logs bypass the pattern and embedding stages.
        if self.policy.is_legacy_source(source) {
            tracing::debug!("Legacy source {:?}, routing directly to LLM", source);
            return (self.run_llm(entry).await, ClassificationStage::Llm, None);
        }

        if let Some(label) = self.patterns.classify(&entry.log_message) {
            return (label.to_string(), ClassificationStage::Pattern, None);
        }

        match self.embedding.classify(&entry.log_message) {
            Ok((label, confidence)) if confidence >= self.policy.confidence_threshold => {
                return (label, ClassificationStage::Embedding, Some(confidence));
            }
            Ok((_, confidence)) => {
                tracing::debug!(
                    "Embedding confidence {:.3} below threshold {:.3}, falling back to LLM",
                    confidence,
                    self.policy.confidence_threshold
                );
            }
            Err(e) => {
                tracing::warn!("Embedding stage failed, falling back to LLM: {}", e);
            }
        }

        (self.run_llm(entry).await, ClassificationStage::Llm, None)
    }

    /// The LLM stage handles its own retries and degrades to the terminal
    /// label internally; an escaping error is downgraded here as well.
    async fn run_llm(&self, entry: &LogEntry) -> String {
        match self
            .llm
            .classify(&entry.log_message, entry.source.as_deref())
            .await
        {
            Ok(label) => label,
            Err(e) => {
                tracing::error!("LLM stage error downgraded to terminal label: {}", e);
                UNCLASSIFIED_LABEL.to_string()
            }
        }
    }

    /// Classify a batch. Entries are independent: they run concurrently up to
    /// `max_concurrency`, results come back in input order, and one entry's
    /// failure never aborts its siblings. Entries still pending at the batch
    /// deadline are marked with the terminal label instead of hanging.
    ///
    /// Entries are taken by value so the batch future stays well-formed when
    /// driven from a spawned job task.
    pub async fn classify_batch(&self, entries: Vec<LogEntry>) -> Vec<ClassificationResult> {
        let deadline = Instant::now() + self.policy.batch_timeout;

        futures::stream::iter(entries)
            .map(|entry| async move {
                match tokio::time::timeout_at(deadline, self.classify_entry(&entry)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("Batch deadline exceeded for entry: {}", entry.log_message);
                        let timed_out = ClassificationResult {
                            id: entry.id,
                            source: entry.source,
                            log_message: entry.log_message,
                            target_label: UNCLASSIFIED_LABEL.to_string(),
                            stage: ClassificationStage::Unclassified,
                            confidence: None,
                            processing_time_ms: self.policy.batch_timeout.as_secs_f64() * 1000.0,
                        };
                        self.metrics.record(
                            ClassificationStage::Unclassified,
                            timed_out.processing_time_ms,
                            true,
                        );
                        timed_out
                    }
                }
            })
            .buffered(self.policy.max_concurrency)
            .collect()
            .await
    }
}
