use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    /// Native Ollama `/api/generate` endpoint.
    #[default]
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` server.
    #[serde(rename = "openai")]
    OpenAI,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Budget for establishing the TCP/TLS connection.
    pub connect_timeout_secs: u64,
    /// Budget for the whole request, body included.
    pub request_timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Ollama,
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "deepseek-r1:1.5b".to_string(),
            api_key: None,
            connect_timeout_secs: 60,
            request_timeout_secs: 300,
        }
    }
}
