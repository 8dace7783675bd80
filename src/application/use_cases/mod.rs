pub mod chat_pipeline;
pub mod db_connection_manager;
pub mod prompt_builder;
pub mod sql_extractor;
pub mod summary_builder;
