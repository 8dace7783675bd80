use crate::application::use_cases::chat_pipeline::{ChatInput, ChatPipeline};
use crate::domain::db_connection::ConnectionDescriptor;
use crate::domain::error::{PipelineError, PipelineFailure};
use crate::domain::llm_config::LLMConfig;
use crate::domain::pipeline::{Row, SummaryPreview};
use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::llm_clients::LLMClient;
use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use validator::Validate;

const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub source: String,
    pub message: String,
}

pub struct HttpState {
    pub pipeline: Arc<ChatPipeline>,
    pub llm_client: Arc<dyn LLMClient>,
    pub llm_config: LLMConfig,
    pub logs: Arc<Mutex<Vec<LogEntry>>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4096, message = "question must be 1 to 4096 characters"))]
    pub question: String,
    #[validate(nested)]
    pub connection: ConnectionDescriptor,
    #[serde(default)]
    pub chat_history: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub query: String,
    pub result: Vec<Row>,
    pub summary: String,
    pub summary_preview: SummaryPreview,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub response: String,
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub detail: String,
    pub kind: &'static str,
    pub stage: Option<&'static str>,
}

impl ErrorBody {
    fn invalid_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST.as_u16(),
            detail: detail.into(),
            kind: "InvalidRequest",
            stage: None,
        }
    }

    fn from_pipeline_error(error: &PipelineError) -> Self {
        Self {
            status: error.status_code(),
            detail: error.to_string(),
            kind: error.kind().as_str(),
            stage: None,
        }
    }

    fn from_failure(failure: &PipelineFailure) -> Self {
        Self {
            stage: Some(failure.stage.as_str()),
            ..Self::from_pipeline_error(&failure.error)
        }
    }

    fn into_response(self) -> HttpResponse {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        HttpResponse::build(status).json(self)
    }
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "API is running! Use /api/chat for queries."
    }))
}

#[post("/chat")]
async fn chat(data: web::Data<HttpState>, req: web::Json<ChatRequest>) -> impl Responder {
    let req = req.into_inner();

    if let Err(errors) = req.validate() {
        add_log(
            &data.logs,
            "WARN",
            "HttpApi",
            &format!("Rejected chat request: {}", errors),
        );
        return ErrorBody::invalid_request(errors.to_string()).into_response();
    }

    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!(
            "Chat question against {} (history={})",
            req.connection.display_target(),
            req.chat_history.len()
        ),
    );

    let input = ChatInput::new(req.question, req.connection).with_history(req.chat_history);

    match data.pipeline.run(input).await {
        Ok(outcome) => {
            add_log(
                &data.logs,
                "INFO",
                "Pipeline",
                &format!(
                    "Answered with {} row(s): {}",
                    outcome.result.row_count(),
                    outcome.query
                ),
            );
            HttpResponse::Ok().json(ChatResponse {
                query: outcome.query.into_string(),
                result: outcome.result.rows,
                summary: outcome.summary,
                summary_preview: outcome.summary_preview,
            })
        }
        Err(failure) => {
            add_log(
                &data.logs,
                "ERROR",
                "Pipeline",
                &format!("Failed after {}: {}", failure.stage.as_str(), failure.error),
            );
            ErrorBody::from_failure(&failure).into_response()
        }
    }
}

#[post("/generate")]
async fn generate(data: web::Data<HttpState>, req: web::Json<GenerateRequest>) -> impl Responder {
    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!(
            "Generating (provider={:?} model={})",
            data.llm_config.provider, data.llm_config.model
        ),
    );

    match data.llm_client.generate(&data.llm_config, &req.prompt).await {
        Ok(response) => HttpResponse::Ok().json(GenerateResponse { response }),
        Err(e) => {
            let error = PipelineError::from(e);
            add_log(
                &data.logs,
                "ERROR",
                "HttpApi",
                &format!("Generation failed: {}", error),
            );
            ErrorBody::from_pipeline_error(&error).into_response()
        }
    }
}

#[get("/logs")]
async fn get_logs(data: web::Data<HttpState>) -> impl Responder {
    let logs = data.logs.lock().unwrap_or_else(PoisonError::into_inner);
    HttpResponse::Ok().json(&*logs)
}

/// Appends to the in-memory ring served at `/api/logs` and mirrors the
/// message to tracing.
pub fn add_log_entry(
    logs: &Mutex<Vec<LogEntry>>,
    level: &str,
    source: &str,
    message: &str,
) -> LogEntry {
    match level {
        "ERROR" => tracing::error!(source, "{}", message),
        "WARN" => tracing::warn!(source, "{}", message),
        _ => tracing::info!(source, "{}", message),
    }

    let entry = LogEntry {
        time: Local::now().format("%H:%M:%S").to_string(),
        level: level.to_string(),
        source: source.to_string(),
        message: message.to_string(),
    };
    let mut logs = logs.lock().unwrap_or_else(PoisonError::into_inner);
    logs.push(entry.clone());
    if logs.len() > MAX_LOG_ENTRIES {
        logs.remove(0);
    }
    entry
}

pub fn add_log(logs: &Mutex<Vec<LogEntry>>, level: &str, source: &str, message: &str) {
    add_log_entry(logs, level, source, message);
}

/// Malformed JSON gets the same error body as a failed validation.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let response = ErrorBody::invalid_request(err.to_string()).into_response();
        actix_web::error::InternalError::from_response(err, response).into()
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config()).service(index).service(
        web::scope("/api")
            .service(chat)
            .service(generate)
            .service(get_logs),
    );
}

fn build_cors(allowed_origins: &[String]) -> Cors {
    if allowed_origins.is_empty() {
        return Cors::permissive();
    }

    allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
}

pub fn start_server(state: HttpState, config: &ServerConfig) -> std::io::Result<Server> {
    let state = web::Data::new(state);
    let allowed_origins = config.cors_allowed_origins.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&allowed_origins))
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run();

    Ok(server)
}
