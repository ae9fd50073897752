use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::orchestrator::ClassificationStage;

/// Append-only classification counters.
///
/// All fields are atomics so concurrent batch workers can record outcomes
/// without a lock. Snapshots are taken field by field and may be very
/// slightly torn under load, which is acceptable for monitoring output.
pub struct Metrics {
    started_at: Instant,
    pattern: AtomicU64,
    embedding: AtomicU64,
    llm: AtomicU64,
    unclassified: AtomicU64,
    errors: AtomicU64,
    total_processing_time_us: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_classifications: u64,
    pub pattern: u64,
    pub embedding: u64,
    pub llm: u64,
    pub unclassified: u64,
    pub errors: u64,
    pub average_processing_time_ms: f64,
    pub error_rate: f64,
    pub uptime_seconds: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            pattern: AtomicU64::new(0),
            embedding: AtomicU64::new(0),
            llm: AtomicU64::new(0),
            unclassified: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_processing_time_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, stage: ClassificationStage, elapsed_ms: f64, error: bool) {
        let counter = match stage {
            ClassificationStage::Pattern => &self.pattern,
            ClassificationStage::Embedding => &self.embedding,
            ClassificationStage::Llm => &self.llm,
            ClassificationStage::Unclassified => &self.unclassified,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_time_us
            .fetch_add((elapsed_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let pattern = self.pattern.load(Ordering::Relaxed);
        let embedding = self.embedding.load(Ordering::Relaxed);
        let llm = self.llm.load(Ordering::Relaxed);
        let unclassified = self.unclassified.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total = pattern + embedding + llm + unclassified;
        let total_us = self.total_processing_time_us.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_classifications: total,
            pattern,
            embedding,
            llm,
            unclassified,
            errors,
            average_processing_time_ms: if total == 0 {
                0.0
            } else {
                (total_us as f64 / 1000.0) / total as f64
            },
            error_rate: if total == 0 {
                0.0
            } else {
                (errors as f64 / total as f64) * 100.0
            },
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let metrics = Metrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_classifications, 0);
        assert_eq!(snap.average_processing_time_ms, 0.0);
        assert_eq!(snap.error_rate, 0.0);
    }

    #[test]
    fn test_record_by_stage() {
        let metrics = Metrics::new();
        metrics.record(ClassificationStage::Pattern, 1.0, false);
        metrics.record(ClassificationStage::Pattern, 3.0, false);
        metrics.record(ClassificationStage::Llm, 300.0, false);
        metrics.record(ClassificationStage::Unclassified, 500.0, true);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_classifications, 4);
        assert_eq!(snap.pattern, 2);
        assert_eq!(snap.llm, 1);
        assert_eq!(snap.unclassified, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.error_rate, 25.0);
        assert!((snap.average_processing_time_ms - 201.0).abs() < 0.01);
    }
}
