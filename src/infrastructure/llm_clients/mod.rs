pub mod ollama;
pub mod openai;

use crate::domain::error::GenerationError;
use crate::domain::llm_config::{LLMConfig, LLMProvider};
use async_trait::async_trait;
use ollama::OllamaClient;
use openai::OpenAIClient;
use std::time::Duration;

/// Longest slice of a response body carried inside an error.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Sends one non-streamed prompt and returns the raw generated text.
    async fn generate(&self, config: &LLMConfig, prompt: &str) -> Result<String, GenerationError>;
}

pub struct RouterClient {
    ollama: OllamaClient,
    openai: OpenAIClient,
}

impl RouterClient {
    pub fn new(config: &LLMConfig) -> reqwest::Result<Self> {
        let http = build_http_client(config)?;
        Ok(Self {
            ollama: OllamaClient::with_client(http.clone()),
            openai: OpenAIClient::with_client(http),
        })
    }
}

#[async_trait]
impl LLMClient for RouterClient {
    async fn generate(&self, config: &LLMConfig, prompt: &str) -> Result<String, GenerationError> {
        match config.provider {
            LLMProvider::Ollama => self.ollama.generate(config, prompt).await,
            LLMProvider::OpenAI => self.openai.generate(config, prompt).await,
        }
    }
}

/// Shared HTTP client with the configured connect and total budgets.
pub fn build_http_client(config: &LLMConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
}

/// Joins `path` onto the configured base URL, tolerating a missing or extra
/// trailing slash.
pub(crate) fn endpoint_url(base_url: &str, path: &str) -> Result<url::Url, GenerationError> {
    let base = format!("{}/", base_url.trim_end_matches('/'));
    url::Url::parse(&base)
        .and_then(|url| url.join(path))
        .map_err(|e| GenerationError::Transport {
            status: None,
            body: format!("Invalid base URL '{}': {}", base_url, e),
        })
}

pub(crate) fn map_request_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(err.to_string())
    } else {
        GenerationError::Transport {
            status: err.status().map(|s| s.as_u16()),
            body: format!("Request failed: {}", err),
        }
    }
}

/// Reads a response body, turning non-2xx statuses into transport errors and
/// undecodable bodies into malformed-response errors.
pub(crate) async fn read_json_body(
    response: reqwest::Response,
) -> Result<serde_json::Value, GenerationError> {
    let status = response.status();
    let text = response.text().await.map_err(map_request_error)?;

    if !status.is_success() {
        return Err(GenerationError::Transport {
            status: Some(status.as_u16()),
            body: truncate_body(&text),
        });
    }

    serde_json::from_str(&text).map_err(|e| {
        GenerationError::MalformedResponse(format!(
            "Failed to parse JSON ({}): {}",
            e,
            truncate_body(&text)
        ))
    })
}

fn truncate_body(text: &str) -> String {
    if text.chars().count() > MAX_ERROR_BODY_CHARS {
        let head: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
