pub mod db_connection;
pub mod error;
pub mod llm_config;
pub mod pipeline;
pub mod schema;
