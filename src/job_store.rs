/// In-memory classification job lifecycle
///
/// A job groups the results of one CSV upload so the dashboard can poll
/// progress. Jobs live for the process lifetime only; there is no persistent
/// queue behind them.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::orchestrator::{ClassificationResult, LogEntry, Orchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<ClassificationResult>,
}

#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, ClassificationJob>>,
}

impl JobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn create(&self, total: usize) -> Uuid {
        let job_id = Uuid::new_v4();
        let job = ClassificationJob {
            job_id,
            status: JobStatus::Pending,
            total,
            processed: 0,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            results: Vec::new(),
        };
        self.jobs.write().await.insert(job_id, job);
        job_id
    }

    pub async fn mark_processing(&self, job_id: Uuid) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.status = JobStatus::Processing;
        }
    }

    /// Append a finished chunk of results and bump the processed count.
    pub async fn append_results(&self, job_id: Uuid, results: Vec<ClassificationResult>) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.processed += results.len();
            job.results.extend(results);
        }
    }

    pub async fn complete(&self, job_id: Uuid) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
        }
    }

    pub async fn fail(&self, job_id: Uuid, error: String) {
        if let Some(job) = self.jobs.write().await.get_mut(&job_id) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.error = Some(error);
        }
    }

    pub async fn get(&self, job_id: Uuid) -> Option<ClassificationJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

/// Drive one job to completion, in chunks so pollers see progress.
///
/// The chunk loop runs in a child task supervised here: if it panics, the
/// job is marked failed instead of stranding in `processing` forever.
pub async fn run_job(
    orchestrator: Arc<Orchestrator>,
    jobs: Arc<JobStore>,
    job_id: Uuid,
    entries: Vec<LogEntry>,
    chunk_size: usize,
) {
    let chunk_size = chunk_size.max(1);
    jobs.mark_processing(job_id).await;

    let worker = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let jobs = jobs.clone();
        async move {
            for chunk in entries.chunks(chunk_size) {
                let results = orchestrator.classify_batch(chunk.to_vec()).await;
                jobs.append_results(job_id, results).await;
            }
        }
    });

    match worker.await {
        Ok(()) => {
            tracing::info!("Job {} completed", job_id);
            jobs.complete(job_id).await;
        }
        Err(e) => {
            tracing::error!("Job {} worker failed: {}", job_id, e);
            jobs.fail(job_id, format!("worker task failed: {e}")).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ClassificationStage;

    fn result(message: &str) -> ClassificationResult {
        ClassificationResult {
            id: None,
            source: Some("WebServer".to_string()),
            log_message: message.to_string(),
            target_label: "User Action".to_string(),
            stage: ClassificationStage::Pattern,
            confidence: None,
            processing_time_ms: 0.1,
        }
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let store = JobStore::new();
        let job_id = store.create(2).await;

        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total, 2);
        assert_eq!(job.processed, 0);

        store.mark_processing(job_id).await;
        store.append_results(job_id, vec![result("a")]).await;

        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.processed, 1);

        store.append_results(job_id, vec![result("b")]).await;
        store.complete(job_id).await;

        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed, 2);
        assert_eq!(job.results.len(), 2);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_job_failure() {
        let store = JobStore::new();
        let job_id = store.create(1).await;
        store.fail(job_id, "boom".to_string()).await;

        let job = store.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = JobStore::new();
        assert!(store.get(Uuid::new_v4()).await.is_none());
    }
}
