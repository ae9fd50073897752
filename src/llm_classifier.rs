use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;
use crate::error::ClassifyError;
use crate::orchestrator::UNCLASSIFIED_LABEL;
use crate::traits::FallbackClassifier;

const INITIAL_BACKOFF_MS: u64 = 1000;

static CATEGORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<category>(.*?)</category>").expect("static regex"));

pub struct LlmClassifier {
    provider: String, // "groq", "openai", "anthropic", "ollama"
    model: String,
    api_key: String,
    endpoint: Option<String>,
    categories: Vec<String>,
    max_retries: u32,
    http_client: reqwest::Client,
}

impl LlmClassifier {
    /// A client that cannot be built with the configured timeout is a fatal
    /// startup error, not a silent fallback to default settings.
    pub fn new(config: &Config) -> Result<Self, ClassifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.llm_timeout)
            .build()
            .map_err(|e| ClassifyError::Config(format!("cannot build HTTP client: {e}")))?;

        tracing::info!(
            "LLM classifier initialized: provider={}, model={}",
            config.llm_provider,
            config.llm_model
        );
        Ok(Self {
            provider: config.llm_provider.clone(),
            model: config.llm_model.clone(),
            api_key: config.llm_api_key.clone(),
            endpoint: config.llm_endpoint.clone(),
            categories: config.llm_categories.clone(),
            max_retries: config.llm_max_retries,
            http_client,
        })
    }

    fn build_prompt(&self, message: &str, source: Option<&str>) -> String {
        let source_line = source
            .map(|s| format!("Source system: {s}\n"))
            .unwrap_or_default();
        format!(
            r#"Classify the log message into one of these categories: {categories}.
If you can't figure out a category, use "Unclassified".
Put the category inside <category> </category> tags.
{source_line}Log message: {message}"#,
            categories = self.categories.join(", "),
        )
    }

    /// One API call, no retries.
    async fn classify_once(&self, prompt: &str) -> Result<String> {
        let content = match self.provider.as_str() {
            "groq" => {
                self.call_chat_completions("https://api.groq.com/openai/v1/chat/completions", prompt)
                    .await?
            }
            "openai" => {
                self.call_chat_completions("https://api.openai.com/v1/chat/completions", prompt)
                    .await?
            }
            "anthropic" => self.call_anthropic(prompt).await?,
            "ollama" => self.call_ollama(prompt).await?,
            other => anyhow::bail!("Unsupported provider: {}", other),
        };
        Ok(parse_category(&content))
    }

    /// OpenAI-compatible chat completions endpoint (OpenAI, Groq).
    async fn call_chat_completions(&self, url: &str, prompt: &str) -> Result<String> {
        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": 0.1,
            "max_tokens": 100
        });

        let response = self
            .http_client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let response_json: serde_json::Value = response.json().await?;

        if !status.is_success() {
            anyhow::bail!("{} API error: {}", self.provider, response_json);
        }

        if let Some(generated_text) = response_json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
        {
            Ok(generated_text.to_string())
        } else {
            anyhow::bail!("No response from {}", self.provider)
        }
    }

    async fn call_anthropic(&self, prompt: &str) -> Result<String> {
        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": 100,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        let response = self
            .http_client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let response_json: serde_json::Value = response.json().await?;

        if !status.is_success() {
            anyhow::bail!("Anthropic API error: {}", response_json);
        }

        if let Some(generated_text) = response_json
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|v| v.as_str())
        {
            Ok(generated_text.to_string())
        } else {
            anyhow::bail!("No response from Anthropic")
        }
    }

    async fn call_ollama(&self, prompt: &str) -> Result<String> {
        let endpoint = self
            .endpoint
            .as_deref()
            .unwrap_or("http://localhost:11434");

        let request_body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.1,
                "top_p": 0.9,
            }
        });

        let response = self
            .http_client
            .post(format!("{}/api/generate", endpoint))
            .json(&request_body)
            .send()
            .await?;

        let response_json: serde_json::Value = response.json().await?;

        if let Some(generated_text) = response_json.get("response").and_then(|v| v.as_str()) {
            Ok(generated_text.to_string())
        } else {
            anyhow::bail!("No response from Ollama")
        }
    }
}

/// Extract the label from `<category>...</category>` tags.
fn parse_category(content: &str) -> String {
    let category = CATEGORY_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or("");
    if category.is_empty() {
        UNCLASSIFIED_LABEL.to_string()
    } else {
        category.to_string()
    }
}

#[async_trait]
impl FallbackClassifier for LlmClassifier {
    async fn classify(&self, message: &str, source: Option<&str>) -> Result<String> {
        if message.trim().is_empty() {
            return Ok(UNCLASSIFIED_LABEL.to_string());
        }

        let prompt = self.build_prompt(message, source);

        // Retry with exponential backoff
        let attempts = self.max_retries.max(1);
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        for attempt in 1..=attempts {
            match self.classify_once(&prompt).await {
                Ok(label) => {
                    if attempt > 1 {
                        tracing::info!("LLM succeeded on attempt {}", attempt);
                    }
                    return Ok(label);
                }
                Err(e) => {
                    if attempt == attempts {
                        tracing::error!(
                            "LLM classification failed after {} attempts: {}",
                            attempts,
                            e
                        );
                        break;
                    }

                    tracing::warn!(
                        "LLM attempt {} failed, retrying in {}ms: {}",
                        attempt,
                        backoff_ms,
                        e
                    );

                    // Exponential backoff with jitter
                    let jitter = (backoff_ms as f64 * 0.1 * rand::random::<f64>()) as u64;
                    tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
                    backoff_ms *= 2;
                }
            }
        }

        // Graceful degradation: retries exhausted
        Ok(UNCLASSIFIED_LABEL.to_string())
    }

    fn name(&self) -> &str {
        "llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ollama provider pointed at a port nothing listens on; requests fail
    /// immediately at connect time.
    fn unreachable_config(max_retries: u32) -> Config {
        Config {
            port: 8000,
            max_upload_bytes: 1024,
            model_dir: "models/log-classifier".to_string(),
            confidence_threshold: 0.5,
            pattern_rules_file: None,
            legacy_sources: vec!["LegacyCRM".to_string()],
            llm_provider: "ollama".to_string(),
            llm_api_key: String::new(),
            llm_model: "llama3".to_string(),
            llm_endpoint: Some("http://127.0.0.1:1".to_string()),
            llm_timeout: Duration::from_millis(200),
            llm_max_retries: max_retries,
            llm_categories: vec![
                "Workflow Error".to_string(),
                "Deprecation Warning".to_string(),
            ],
            max_concurrency: 2,
            batch_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retries_exhausted_degrades_to_terminal_label() {
        let classifier = LlmClassifier::new(&unreachable_config(1)).unwrap();
        let label = classifier
            .classify("Something truly novel happened", Some("WebServer"))
            .await
            .unwrap();
        assert_eq!(label, UNCLASSIFIED_LABEL);
    }

    #[tokio::test]
    async fn test_blank_message_skips_the_api_entirely() {
        // With three retries a real attempt against the dead endpoint would
        // spend seconds in backoff; the blank-input path must return at once.
        let classifier = LlmClassifier::new(&unreachable_config(3)).unwrap();
        let start = std::time::Instant::now();
        let label = classifier.classify("   \n\t", None).await.unwrap();
        assert_eq!(label, UNCLASSIFIED_LABEL);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_parse_category() {
        assert_eq!(
            parse_category("Sure! <category>Workflow Error</category>"),
            "Workflow Error"
        );
        assert_eq!(
            parse_category("<category>\n  Deprecation Warning\n</category> extra"),
            "Deprecation Warning"
        );
    }

    #[test]
    fn test_parse_category_missing_tags() {
        assert_eq!(parse_category("Workflow Error"), UNCLASSIFIED_LABEL);
        assert_eq!(parse_category("<category></category>"), UNCLASSIFIED_LABEL);
        assert_eq!(parse_category(""), UNCLASSIFIED_LABEL);
    }
}
