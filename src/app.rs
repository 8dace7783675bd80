use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::application::{ChatPipeline, DbConnectionManager};
use crate::infrastructure::config::{load_config, AppConfig};
use crate::infrastructure::llm_clients::{LLMClient, RouterClient};
use crate::interfaces::http::{add_log, start_server, HttpState};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] figment::Error),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads configuration, wires the pipeline and serves HTTP until shutdown.
pub async fn run() -> Result<(), StartupError> {
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let config = load_config()?;
    serve(config).await
}

async fn serve(config: AppConfig) -> Result<(), StartupError> {
    let llm_client: Arc<dyn LLMClient> = Arc::new(RouterClient::new(&config.llm)?);
    let db = Arc::new(DbConnectionManager::with_config(config.database.clone()));
    let pipeline = ChatPipeline::new(
        db.clone(),
        llm_client.clone(),
        config.llm.clone(),
        &config.summary,
    );

    let logs = Arc::new(Mutex::new(Vec::new()));
    add_log(
        &logs,
        "INFO",
        "App",
        &format!(
            "Using {:?} model {} at {}",
            config.llm.provider, config.llm.model, config.llm.base_url
        ),
    );

    let state = HttpState {
        pipeline: Arc::new(pipeline),
        llm_client,
        llm_config: config.llm.clone(),
        logs,
    };

    let server = start_server(state, &config.server)?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        read_only = config.database.read_only,
        "HTTP server listening"
    );

    let result = server.await;
    db.close_all().await;
    result?;

    info!("HTTP server stopped");
    Ok(())
}
