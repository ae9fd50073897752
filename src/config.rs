use std::env;
use std::time::Duration;

use crate::error::ClassifyError;

#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub port: u16,
    pub max_upload_bytes: usize,

    // Embedding classifier configuration
    pub model_dir: String,
    pub confidence_threshold: f32,

    // Pattern matcher configuration (optional JSON rules file)
    pub pattern_rules_file: Option<String>,

    // Routing policy
    pub legacy_sources: Vec<String>,

    // LLM configuration
    pub llm_provider: String, // e.g., "groq", "openai", "anthropic", "ollama"
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_endpoint: Option<String>, // For Ollama or custom endpoints
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    pub llm_categories: Vec<String>,

    // Batch processing
    pub max_concurrency: usize,
    pub batch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ClassifyError> {
        let llm_provider = env::var("LLM_PROVIDER").unwrap_or_else(|_| "groq".to_string());

        let llm_api_key = match llm_provider.as_str() {
            // Ollama runs locally and needs no key
            "ollama" => env::var("LLM_API_KEY").unwrap_or_default(),
            _ => env::var("LLM_API_KEY").map_err(|_| {
                ClassifyError::Config(format!(
                    "LLM_API_KEY environment variable is required for provider '{llm_provider}'"
                ))
            })?,
        };

        let llm_model = env::var("LLM_MODEL").unwrap_or_else(|_| {
            // Provide sensible defaults based on provider
            match llm_provider.as_str() {
                "groq" => "llama-3.3-70b-versatile".to_string(),
                "openai" => "gpt-4o-mini".to_string(),
                "anthropic" => "claude-3-5-haiku-latest".to_string(),
                "ollama" => env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3".to_string()),
                _ => "llama-3.3-70b-versatile".to_string(),
            }
        });

        let confidence_threshold = parse_env("CONFIDENCE_THRESHOLD", 0.5f32)?;
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ClassifyError::Config(format!(
                "CONFIDENCE_THRESHOLD must be within [0, 1], got {confidence_threshold}"
            )));
        }

        let max_concurrency = parse_env("MAX_CONCURRENCY", 8usize)?;
        if max_concurrency == 0 {
            return Err(ClassifyError::Config(
                "MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            port: parse_env("PORT", 8000u16)?,
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 50 * 1024 * 1024usize)?,

            model_dir: env::var("MODEL_DIR").unwrap_or_else(|_| "models/log-classifier".to_string()),
            confidence_threshold,

            pattern_rules_file: env::var("PATTERN_RULES_FILE").ok(),

            legacy_sources: env::var("LEGACY_SOURCES")
                .unwrap_or_else(|_| "LegacyCRM".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            llm_api_key,
            llm_model,
            llm_endpoint: env::var("LLM_ENDPOINT").ok(),
            llm_timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 30u64)?),
            llm_max_retries: parse_env("LLM_MAX_RETRIES", 3u32)?,
            llm_categories: env::var("LLM_CATEGORIES")
                .unwrap_or_else(|_| "Workflow Error,Deprecation Warning".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            llm_provider,

            max_concurrency,
            batch_timeout: Duration::from_secs(parse_env("BATCH_TIMEOUT_SECS", 300u64)?),
        })
    }

    pub fn log_config(&self) {
        tracing::info!("📋 Configuration:");
        tracing::info!("   Port: {}", self.port);
        tracing::info!("   Model Dir: {}", self.model_dir);
        tracing::info!("   Confidence Threshold: {}", self.confidence_threshold);
        tracing::info!("   Legacy Sources: {:?}", self.legacy_sources);
        tracing::info!("   LLM Provider: {}", self.llm_provider);
        tracing::info!("   LLM Model: {}", self.llm_model);
        tracing::info!(
            "   LLM API Key: {}***",
            &self.llm_api_key.chars().take(4).collect::<String>()
        );
        if let Some(ref endpoint) = self.llm_endpoint {
            tracing::info!("   LLM Endpoint: {}", endpoint);
        }
        tracing::info!("   LLM Timeout: {:?}", self.llm_timeout);
        tracing::info!("   LLM Max Retries: {}", self.llm_max_retries);
        tracing::info!("   Max Concurrency: {}", self.max_concurrency);
        tracing::info!("   Batch Timeout: {:?}", self.batch_timeout);
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ClassifyError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ClassifyError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-wide, so defaults are exercised through a
    // single test to avoid ordering hazards.
    #[test]
    fn test_defaults() {
        std::env::set_var("LLM_PROVIDER", "ollama");
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.legacy_sources, vec!["LegacyCRM".to_string()]);
        assert_eq!(config.llm_max_retries, 3);
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(
            config.llm_categories,
            vec!["Workflow Error".to_string(), "Deprecation Warning".to_string()]
        );
    }
}
