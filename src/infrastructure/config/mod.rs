//! Layered service configuration.
//!
//! Merge order, later wins:
//! 1. compiled defaults
//! 2. `dbchat.toml` in the working directory if present, or the file named by
//!    `DBCHAT_CONFIG`, which must exist
//! 3. `DBCHAT_*` environment variables (`DBCHAT_LLM_BASE_URL` -> `llm.base_url`)

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::application::use_cases::db_connection_manager::DbConnectionConfig;
use crate::domain::llm_config::LLMConfig;

pub const DEFAULT_CONFIG_FILE: &str = "dbchat.toml";
pub const CONFIG_PATH_ENV: &str = "DBCHAT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty means any origin is accepted.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            cors_allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Rows of the result handed to the summarizer.
    pub preview_rows: usize,
    /// Replace a failed summary call with the fallback sentence instead of
    /// failing the run.
    pub degrade_on_failure: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            preview_rows: 3,
            degrade_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub database: DbConnectionConfig,
    pub summary: SummaryConfig,
}

/// Loads configuration from the default file location plus environment.
/// A file named explicitly through `DBCHAT_CONFIG` must exist.
pub fn load_config() -> Result<AppConfig, figment::Error> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => load_required_config(Path::new(&path)),
        Err(_) => load_config_from_path(Path::new(DEFAULT_CONFIG_FILE)),
    }
}

/// Like [`load_config_from_path`], but a missing file is an error.
pub fn load_required_config(path: &Path) -> Result<AppConfig, figment::Error> {
    if !path.is_file() {
        return Err(figment::Error::from(format!(
            "config file {} does not exist",
            path.display()
        )));
    }
    load_config_from_path(path)
}

/// Loads configuration from a specific file with env var overrides. A
/// missing file is not an error.
pub fn load_config_from_path(path: &Path) -> Result<AppConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Loads configuration from TOML text only, without env overrides.
pub fn load_config_from_str(toml_content: &str) -> Result<AppConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

// Env::split("_") would break keys such as `base_url`, so only the section
// prefix is turned into a dot. Keys arrive as written in the environment.
fn env_provider() -> Env {
    Env::prefixed("DBCHAT_").ignore(&["config"]).map(|key| {
        let mapped = key
            .as_str()
            .to_ascii_lowercase()
            .replacen("server_", "server.", 1)
            .replacen("llm_", "llm.", 1)
            .replacen("database_", "database.", 1)
            .replacen("summary_", "summary.", 1);
        mapped.into()
    })
}
