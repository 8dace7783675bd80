use super::{endpoint_url, map_request_error, read_json_body, LLMClient};
use crate::domain::error::GenerationError;
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Client for OpenAI-compatible servers (LM Studio, vLLM, llama.cpp server).
pub struct OpenAIClient {
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(config: &LLMConfig) -> reqwest::Result<Self> {
        Ok(Self::with_client(super::build_http_client(config)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn generate(&self, config: &LLMConfig, prompt: &str) -> Result<String, GenerationError> {
        let url = endpoint_url(&config.base_url, "chat/completions")?;

        let mut request = self
            .client
            .post(url)
            .timeout(Duration::from_secs(config.request_timeout_secs));

        if let Some(api_key) = &config.api_key {
            request = request.bearer_auth(api_key);
        }

        let body = json!({
            "model": config.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "stream": false,
        });

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        let json = read_json_body(response).await?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GenerationError::MalformedResponse("Invalid response format".to_string()))
    }
}
