use super::{endpoint_url, map_request_error, read_json_body, LLMClient};
use crate::domain::error::GenerationError;
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Client for Ollama's native `/api/generate` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &LLMConfig) -> reqwest::Result<Self> {
        Ok(Self::with_client(super::build_http_client(config)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate(&self, config: &LLMConfig, prompt: &str) -> Result<String, GenerationError> {
        let url = endpoint_url(&config.base_url, "api/generate")?;

        let body = GenerateRequest {
            model: &config.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(url)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        debug!(status = %response.status(), model = %config.model, "Ollama responded");

        let json = read_json_body(response).await?;

        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                GenerationError::MalformedResponse(
                    "Invalid API response - missing 'response' key".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> LLMConfig {
        LLMConfig {
            base_url: base_url.to_string(),
            model: "test-model".to_string(),
            request_timeout_secs: 5,
            connect_timeout_secs: 5,
            ..LLMConfig::default()
        }
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(serde_json::json!({
                "model": "test-model",
                "prompt": "hello",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "test-model",
                "response": "SELECT 1 FROM t",
                "done": true
            })))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = OllamaClient::new(&config).unwrap();
        let text = client.generate(&config, "hello").await.unwrap();
        assert_eq!(text, "SELECT 1 FROM t");
    }

    #[tokio::test]
    async fn test_generate_http_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = OllamaClient::new(&config).unwrap();
        let err = client.generate(&config, "hello").await.unwrap_err();
        assert_eq!(
            err,
            GenerationError::Transport {
                status: Some(500),
                body: "model not loaded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_generate_non_json_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = OllamaClient::new(&config).unwrap();
        let err = client.generate(&config, "hello").await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_generate_missing_field_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})),
            )
            .mount(&server)
            .await;

        let config = test_config(&server.uri());
        let client = OllamaClient::new(&config).unwrap();
        let err = client.generate(&config, "hello").await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "late"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = LLMConfig {
            request_timeout_secs: 1,
            ..test_config(&server.uri())
        };
        let client = OllamaClient::new(&config).unwrap();
        let err = client.generate(&config, "hello").await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_generate_unreachable_is_transport() {
        // Nothing listens on port 9 locally; the connection is refused.
        let config = test_config("http://127.0.0.1:9");
        let client = OllamaClient::new(&config).unwrap();
        let err = client.generate(&config, "hello").await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Transport { status: None, .. } | GenerationError::Timeout(_)
        ));
    }
}
