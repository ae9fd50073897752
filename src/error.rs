use std::path::PathBuf;

/// Load-time failures. These are fatal at startup: the service refuses to
/// start rather than failing per-request later.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("invalid pattern rule '{pattern}': {source}")]
    InvalidRule {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to load model artifact from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("CSV input is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("failed to parse CSV input: {0}")]
    Csv(#[from] csv::Error),
}
