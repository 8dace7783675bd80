pub mod use_cases;

pub use use_cases::chat_pipeline::{ChatInput, ChatPipeline, PipelineOutcome};
pub use use_cases::db_connection_manager::{DbConnectionManager, SqlDatabase};
