use serde::Serialize;
use thiserror::Error;

use crate::domain::pipeline::PipelineStage;

/// Failures of the database collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Schema introspection failed: {0}")]
    SchemaIntrospectionFailed(String),
    #[error("Query execution failed: {0}")]
    QueryExecutionFailed(String),
}

/// Failures of a single call to the text-generation backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation request timed out: {0}")]
    Timeout(String),
    #[error("Generation request failed{}: {body}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Transport { status: Option<u16>, body: String },
    #[error("Generation response was malformed: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Generated text did not contain a valid SQL query")]
    NoValidSqlFound,
}

/// Response-level error taxonomy. Only the orchestrator builds these from
/// stage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Schema introspection failed: {0}")]
    SchemaIntrospectionFailed(String),
    #[error("Text generation timed out: {0}")]
    GenerationTimeout(String),
    #[error("Text generation service error{}: {detail}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    GenerationTransportError { status: Option<u16>, detail: String },
    #[error("Text generation returned an unexpected response: {0}")]
    GenerationMalformedResponse(String),
    #[error("The model did not return a valid SQL query")]
    NoValidSqlFound,
    #[error("Query execution failed: {0}")]
    QueryExecutionFailed(String),
    #[error("Summary generation failed: {0}")]
    SummaryGenerationFailed(String),
}

/// Stable, serializable name of a [`PipelineError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ConnectionFailed,
    SchemaIntrospectionFailed,
    GenerationTimeout,
    GenerationTransportError,
    GenerationMalformedResponse,
    NoValidSqlFound,
    QueryExecutionFailed,
    SummaryGenerationFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "ConnectionFailed",
            ErrorKind::SchemaIntrospectionFailed => "SchemaIntrospectionFailed",
            ErrorKind::GenerationTimeout => "GenerationTimeout",
            ErrorKind::GenerationTransportError => "GenerationTransportError",
            ErrorKind::GenerationMalformedResponse => "GenerationMalformedResponse",
            ErrorKind::NoValidSqlFound => "NoValidSqlFound",
            ErrorKind::QueryExecutionFailed => "QueryExecutionFailed",
            ErrorKind::SummaryGenerationFailed => "SummaryGenerationFailed",
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            PipelineError::SchemaIntrospectionFailed(_) => ErrorKind::SchemaIntrospectionFailed,
            PipelineError::GenerationTimeout(_) => ErrorKind::GenerationTimeout,
            PipelineError::GenerationTransportError { .. } => ErrorKind::GenerationTransportError,
            PipelineError::GenerationMalformedResponse(_) => {
                ErrorKind::GenerationMalformedResponse
            }
            PipelineError::NoValidSqlFound => ErrorKind::NoValidSqlFound,
            PipelineError::QueryExecutionFailed(_) => ErrorKind::QueryExecutionFailed,
            PipelineError::SummaryGenerationFailed(_) => ErrorKind::SummaryGenerationFailed,
        }
    }

    /// HTTP status the error is surfaced with.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::ConnectionFailed(_) | PipelineError::SchemaIntrospectionFailed(_) => 500,
            PipelineError::GenerationTimeout(_) => 504,
            PipelineError::GenerationTransportError { .. }
            | PipelineError::GenerationMalformedResponse(_)
            | PipelineError::SummaryGenerationFailed(_) => 502,
            PipelineError::NoValidSqlFound | PipelineError::QueryExecutionFailed(_) => 422,
        }
    }
}

impl From<DbError> for PipelineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ConnectionFailed(msg) => PipelineError::ConnectionFailed(msg),
            DbError::SchemaIntrospectionFailed(msg) => PipelineError::SchemaIntrospectionFailed(msg),
            DbError::QueryExecutionFailed(msg) => PipelineError::QueryExecutionFailed(msg),
        }
    }
}

impl From<GenerationError> for PipelineError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Timeout(msg) => PipelineError::GenerationTimeout(msg),
            GenerationError::Transport { status, body } => {
                PipelineError::GenerationTransportError {
                    status,
                    detail: body,
                }
            }
            GenerationError::MalformedResponse(msg) => {
                PipelineError::GenerationMalformedResponse(msg)
            }
        }
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::NoValidSqlFound => PipelineError::NoValidSqlFound,
        }
    }
}

/// A failed pipeline run: the last state reached and the reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("pipeline failed after {stage:?}: {error}")]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    pub error: PipelineError,
}

impl PipelineFailure {
    pub fn new(stage: PipelineStage, error: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}
