/// Dependency injection traits for the classification stages
///
/// The orchestrator talks to the embedding and LLM stages through these
/// traits so tests can swap in call-counting mocks and verify the routing
/// policy without model artifacts or network access.
use anyhow::Result;
use async_trait::async_trait;

/// Embedding-stage classifier: local computation, no network.
///
/// Returns the predicted label together with a confidence score in [0, 1].
/// The caller decides whether the confidence is high enough to accept.
pub trait VectorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> Result<(String, f32)>;

    /// Get the name/identifier of this classifier (for reporting)
    fn name(&self) -> &str;
}

/// LLM-stage classifier: outbound network call, billable.
///
/// Implementations own their timeout and retry policy; after retries are
/// exhausted they should return the terminal label rather than an error
/// wherever possible. Any error that does escape is downgraded by the
/// orchestrator, never surfaced to the API caller.
#[async_trait]
pub trait FallbackClassifier: Send + Sync {
    async fn classify(&self, message: &str, source: Option<&str>) -> Result<String>;

    /// Get the name/identifier of this classifier (for reporting)
    fn name(&self) -> &str;
}
