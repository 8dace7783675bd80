//! Question-to-answer pipeline.
//!
//! One run walks a linear state machine:
//!
//! ```text
//! Start -> SchemaFetched -> PromptBuilt -> SqlGenerated -> SqlExtracted
//!       -> QueryExecuted -> SummaryGenerated -> Done
//! ```
//!
//! Any stage failure stops the run and is reported together with the last
//! state reached. Nothing is retried and no partial outcome is returned.

use crate::application::use_cases::db_connection_manager::SqlDatabase;
use crate::application::use_cases::prompt_builder::build_sql_prompt;
use crate::application::use_cases::sql_extractor::{extract_sql_query, ExtractedQuery};
use crate::application::use_cases::summary_builder::{SummaryBuilder, SUMMARY_FALLBACK};
use crate::domain::db_connection::ConnectionDescriptor;
use crate::domain::error::{PipelineError, PipelineFailure};
use crate::domain::llm_config::LLMConfig;
use crate::domain::pipeline::{PipelineStage, QueryResult, SummaryPreview};
use crate::infrastructure::config::SummaryConfig;
use crate::infrastructure::llm_clients::LLMClient;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Input of one run. `history` is a snapshot of the caller's prior
/// questions, most recent last.
#[derive(Debug, Clone)]
pub struct ChatInput {
    pub question: String,
    pub connection: ConnectionDescriptor,
    pub history: Vec<String>,
}

impl ChatInput {
    pub fn new(question: impl Into<String>, connection: ConnectionDescriptor) -> Self {
        Self {
            question: question.into(),
            connection,
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }
}

/// A successful run. Every field is always populated.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub query: ExtractedQuery,
    pub result: QueryResult,
    pub summary: String,
    pub summary_preview: SummaryPreview,
}

pub struct ChatPipeline {
    db: Arc<dyn SqlDatabase>,
    llm: Arc<dyn LLMClient>,
    llm_config: LLMConfig,
    summary: SummaryBuilder,
    degrade_summary: bool,
}

impl ChatPipeline {
    pub fn new(
        db: Arc<dyn SqlDatabase>,
        llm: Arc<dyn LLMClient>,
        llm_config: LLMConfig,
        summary_config: &SummaryConfig,
    ) -> Self {
        Self {
            db,
            llm,
            llm_config,
            summary: SummaryBuilder::new(summary_config.preview_rows),
            degrade_summary: summary_config.degrade_on_failure,
        }
    }

    pub async fn run(&self, input: ChatInput) -> Result<PipelineOutcome, PipelineFailure> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "pipeline_run",
            %run_id,
            target_db = %input.connection.display_target()
        );
        self.run_stages(input).instrument(span).await
    }

    async fn run_stages(&self, input: ChatInput) -> Result<PipelineOutcome, PipelineFailure> {
        let ChatInput {
            question,
            connection,
            history,
        } = input;
        let mut stage = PipelineStage::Start;

        self.db
            .check_liveness(&connection)
            .await
            .map_err(|e| fail(stage, e))?;
        let schema = self
            .db
            .snapshot_schema(&connection)
            .await
            .map_err(|e| fail(stage, e))?;
        stage = advance(stage, PipelineStage::SchemaFetched);

        let prompt = build_sql_prompt(&schema, &question, &history, connection.engine);
        stage = advance(stage, PipelineStage::PromptBuilt);

        let raw = self
            .llm
            .generate(&self.llm_config, &prompt)
            .await
            .map_err(|e| fail(stage, e))?;
        stage = advance(stage, PipelineStage::SqlGenerated);

        let query = extract_sql_query(raw.trim()).map_err(|e| {
            debug!(raw = %raw, "Generated text had no SQL-shaped line");
            fail(stage, e)
        })?;
        info!(query = %query, "Extracted SQL query");
        stage = advance(stage, PipelineStage::SqlExtracted);

        let result = self
            .db
            .execute(&connection, &query)
            .await
            .map_err(|e| fail(stage, e))?;
        stage = advance(stage, PipelineStage::QueryExecuted);

        let (summary_prompt, summary_preview) = self.summary.build_prompt(&question, &result);
        if summary_preview.truncated {
            debug!(
                rows_sent = summary_preview.rows_sent,
                total_rows = summary_preview.total_rows,
                "Summary preview truncated"
            );
        }

        let summary = match self.llm.generate(&self.llm_config, &summary_prompt).await {
            Ok(raw) => self.summary.finalize(&raw),
            Err(e) if self.degrade_summary => {
                warn!(error = %e, "Summary generation failed, using fallback");
                SUMMARY_FALLBACK.to_string()
            }
            Err(e) => {
                return Err(fail(
                    stage,
                    PipelineError::SummaryGenerationFailed(e.to_string()),
                ))
            }
        };
        stage = advance(stage, PipelineStage::SummaryGenerated);

        advance(stage, PipelineStage::Done);
        info!(rows = result.row_count(), "Pipeline run completed");

        Ok(PipelineOutcome {
            query,
            result,
            summary,
            summary_preview,
        })
    }
}

fn advance(from: PipelineStage, to: PipelineStage) -> PipelineStage {
    debug!(from = from.as_str(), to = to.as_str(), "Pipeline transition");
    to
}

fn fail(stage: PipelineStage, err: impl Into<PipelineError>) -> PipelineFailure {
    let failure = PipelineFailure::new(stage, err);
    if failure.error.status_code() >= 500 {
        error!(
            stage = stage.as_str(),
            kind = ?failure.error.kind(),
            error = %failure.error,
            "Pipeline run failed"
        );
    } else {
        warn!(
            stage = stage.as_str(),
            kind = ?failure.error.kind(),
            error = %failure.error,
            "Pipeline run failed"
        );
    }
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::db_connection_manager::{
        DbConnectionConfig, DbConnectionManager,
    };
    use crate::domain::error::{DbError, ErrorKind, GenerationError};
    use crate::domain::pipeline::{ConversationLog, Row};
    use crate::domain::schema::{ColumnDescriptor, SchemaSnapshot};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeDatabase {
        liveness: Result<(), DbError>,
        schema: Result<SchemaSnapshot, DbError>,
        execution: Result<QueryResult, DbError>,
        liveness_calls: AtomicUsize,
        schema_calls: AtomicUsize,
        execute_calls: AtomicUsize,
        executed: Mutex<Vec<String>>,
    }

    impl FakeDatabase {
        fn healthy(execution: Result<QueryResult, DbError>) -> Self {
            let schema = SchemaSnapshot::new().with_table(
                "orders",
                vec![ColumnDescriptor {
                    name: "customer_id".to_string(),
                    data_type: "integer".to_string(),
                    nullable: false,
                }],
            );
            Self {
                liveness: Ok(()),
                schema: Ok(schema),
                execution,
                liveness_calls: AtomicUsize::new(0),
                schema_calls: AtomicUsize::new(0),
                execute_calls: AtomicUsize::new(0),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SqlDatabase for FakeDatabase {
        async fn check_liveness(&self, _conn: &ConnectionDescriptor) -> Result<(), DbError> {
            self.liveness_calls.fetch_add(1, Ordering::SeqCst);
            self.liveness.clone()
        }

        async fn snapshot_schema(
            &self,
            _conn: &ConnectionDescriptor,
        ) -> Result<SchemaSnapshot, DbError> {
            self.schema_calls.fetch_add(1, Ordering::SeqCst);
            self.schema.clone()
        }

        async fn execute(
            &self,
            _conn: &ConnectionDescriptor,
            query: &ExtractedQuery,
        ) -> Result<QueryResult, DbError> {
            self.execute_calls.fetch_add(1, Ordering::SeqCst);
            self.executed.lock().unwrap().push(query.to_string());
            self.execution.clone()
        }
    }

    /// Replies in order; records every prompt it receives.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLlm {
        async fn generate(
            &self,
            _config: &LLMConfig,
            prompt: &str,
        ) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::MalformedResponse("no reply".to_string())))
        }
    }

    fn counts_result() -> QueryResult {
        let rows = [(1, 2), (2, 1)]
            .iter()
            .map(|(customer, count)| {
                let mut row = Row::new();
                row.insert("customer_id".to_string(), json!(customer));
                row.insert("count".to_string(), json!(count));
                row
            })
            .collect();
        QueryResult {
            columns: vec!["customer_id".to_string(), "count".to_string()],
            rows,
        }
    }

    fn pipeline(db: Arc<FakeDatabase>, llm: Arc<ScriptedLlm>, degrade: bool) -> ChatPipeline {
        ChatPipeline::new(
            db,
            llm,
            LLMConfig::default(),
            &SummaryConfig {
                preview_rows: 3,
                degrade_on_failure: degrade,
            },
        )
    }

    fn input() -> ChatInput {
        ChatInput::new(
            "how many orders has each customer placed?",
            ConnectionDescriptor::postgres("db", 5432, "shop", "user", "pw"),
        )
    }

    #[tokio::test]
    async fn test_successful_run() {
        let db = Arc::new(FakeDatabase::healthy(Ok(counts_result())));
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("<think>group by customer</think>\nSELECT customer_id, COUNT(*) FROM orders GROUP BY customer_id".to_string()),
            Ok("<think>two customers</think>Customer 1 placed 2 orders and customer 2 placed 1.".to_string()),
        ]));

        let outcome = pipeline(db.clone(), llm.clone(), true)
            .run(input())
            .await
            .unwrap();

        assert_eq!(
            outcome.query.as_str(),
            "SELECT customer_id, COUNT(*) FROM orders GROUP BY customer_id;"
        );
        assert_eq!(outcome.result.row_count(), 2);
        assert_eq!(
            outcome.summary,
            "Customer 1 placed 2 orders and customer 2 placed 1."
        );
        assert!(!outcome.summary_preview.truncated);
        assert_eq!(db.execute_calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm.calls(), 2);

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("Table: orders"));
        assert!(prompts[1].starts_with("Summarize these results:"));
    }

    #[tokio::test]
    async fn test_history_reaches_prompt() {
        let db = Arc::new(FakeDatabase::healthy(Ok(counts_result())));
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("SELECT customer_id FROM orders".to_string()),
            Ok("ok".to_string()),
        ]));

        let mut log = ConversationLog::new();
        log.record("how many customers are there?");

        pipeline(db, llm.clone(), true)
            .run(input().with_history(log.questions()))
            .await
            .unwrap();

        assert!(llm.prompts.lock().unwrap()[0].contains("- how many customers are there?"));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_stops_at_start() {
        let mut fake = FakeDatabase::healthy(Ok(counts_result()));
        fake.liveness = Err(DbError::ConnectionFailed("refused".to_string()));
        let db = Arc::new(fake);
        let llm = Arc::new(ScriptedLlm::new(vec![]));

        let failure = pipeline(db.clone(), llm.clone(), true)
            .run(input())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Start);
        assert_eq!(failure.error.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(db.schema_calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_schema_failure_is_distinct_from_connection_failure() {
        let mut fake = FakeDatabase::healthy(Ok(counts_result()));
        fake.schema = Err(DbError::SchemaIntrospectionFailed(
            "permission denied".to_string(),
        ));
        let db = Arc::new(fake);
        let llm = Arc::new(ScriptedLlm::new(vec![]));

        let failure = pipeline(db.clone(), llm.clone(), true)
            .run(input())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Start);
        assert_eq!(failure.error.kind(), ErrorKind::SchemaIntrospectionFailed);
        assert_eq!(db.liveness_calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_generation_timeout_stops_at_prompt_built() {
        let db = Arc::new(FakeDatabase::healthy(Ok(counts_result())));
        let llm = Arc::new(ScriptedLlm::new(vec![Err(GenerationError::Timeout(
            "deadline".to_string(),
        ))]));

        let failure = pipeline(db.clone(), llm, true)
            .run(input())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::PromptBuilt);
        assert_eq!(failure.error.kind(), ErrorKind::GenerationTimeout);
        assert_eq!(db.execute_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prose_only_never_touches_database() {
        let db = Arc::new(FakeDatabase::healthy(Ok(counts_result())));
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(
            "I am not sure which table holds orders.".to_string(),
        )]));

        let failure = pipeline(db.clone(), llm.clone(), true)
            .run(input())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::SqlGenerated);
        assert_eq!(failure.error, PipelineError::NoValidSqlFound);
        assert_eq!(db.execute_calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_execution_failure_skips_summary() {
        let db = Arc::new(FakeDatabase::healthy(Err(DbError::QueryExecutionFailed(
            "relation \"order\" does not exist".to_string(),
        ))));
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(
            "SELECT id FROM order".to_string()
        )]));

        let failure = pipeline(db.clone(), llm.clone(), true)
            .run(input())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::SqlExtracted);
        assert_eq!(failure.error.kind(), ErrorKind::QueryExecutionFailed);
        assert!(failure.error.to_string().contains("does not exist"));
        assert_eq!(llm.calls(), 1);
        assert_eq!(
            db.executed.lock().unwrap().as_slice(),
            &["SELECT id FROM order;".to_string()]
        );
    }

    #[tokio::test]
    async fn test_summary_failure_degrades() {
        let db = Arc::new(FakeDatabase::healthy(Ok(counts_result())));
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("SELECT customer_id FROM orders".to_string()),
            Err(GenerationError::Transport {
                status: Some(503),
                body: "busy".to_string(),
            }),
        ]));

        let outcome = pipeline(db, llm, true).run(input()).await.unwrap();
        assert_eq!(outcome.summary, SUMMARY_FALLBACK);
        assert_eq!(outcome.result.row_count(), 2);
    }

    #[tokio::test]
    async fn test_summary_failure_without_degrade_fails_run() {
        let db = Arc::new(FakeDatabase::healthy(Ok(counts_result())));
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("SELECT customer_id FROM orders".to_string()),
            Err(GenerationError::Timeout("deadline".to_string())),
        ]));

        let failure = pipeline(db, llm, false).run(input()).await.unwrap_err();
        assert_eq!(failure.stage, PipelineStage::QueryExecuted);
        assert_eq!(failure.error.kind(), ErrorKind::SummaryGenerationFailed);
    }

    #[tokio::test]
    async fn test_empty_summary_falls_back() {
        let db = Arc::new(FakeDatabase::healthy(Ok(QueryResult::default())));
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("SELECT customer_id FROM orders".to_string()),
            Ok("<think>nothing to say</think>".to_string()),
        ]));

        let outcome = pipeline(db, llm, true).run(input()).await.unwrap();
        assert!(outcome.result.is_empty());
        assert_eq!(outcome.summary, SUMMARY_FALLBACK);
    }

    #[tokio::test]
    async fn test_end_to_end_with_sqlite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shop.db");
        {
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(
                    sqlx::sqlite::SqliteConnectOptions::new()
                        .filename(&path)
                        .create_if_missing(true),
                )
                .await
                .unwrap();
            for statement in [
                "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER NOT NULL, total REAL)",
                "INSERT INTO customers VALUES (1, 'Ada'), (2, 'Grace'), (3, 'Linus')",
                "INSERT INTO orders VALUES (1, 1, 9.5), (2, 1, 12.0), (3, 2, 3.25), (4, 3, 1.0), (5, 3, 2.0), (6, 3, 4.0)",
            ] {
                sqlx::query(statement).execute(&pool).await.unwrap();
            }
            pool.close().await;
        }

        let db = Arc::new(DbConnectionManager::with_config(DbConnectionConfig {
            connect_timeout_secs: 2,
            query_timeout_secs: 5,
            sqlite_root: Some(dir.path().to_path_buf()),
            ..DbConnectionConfig::default()
        }));
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok("Here is the query:\nSELECT customer_id, COUNT(*) FROM orders GROUP BY customer_id ORDER BY customer_id".to_string()),
            Ok("Customer 3 placed the most orders.".to_string()),
        ]));

        let pipeline = ChatPipeline::new(
            db,
            llm.clone(),
            LLMConfig::default(),
            &SummaryConfig {
                preview_rows: 2,
                degrade_on_failure: true,
            },
        );
        let outcome = pipeline
            .run(ChatInput::new(
                "how many orders has each customer placed?",
                ConnectionDescriptor::sqlite("shop.db"),
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome.query.as_str(),
            "SELECT customer_id, COUNT(*) FROM orders GROUP BY customer_id ORDER BY customer_id;"
        );
        assert_eq!(outcome.result.row_count(), 3);
        assert_eq!(outcome.result.rows[2]["COUNT(*)"], json!(3));
        assert_eq!(outcome.summary, "Customer 3 placed the most orders.");
        assert_eq!(
            outcome.summary_preview,
            SummaryPreview {
                rows_sent: 2,
                total_rows: 3,
                truncated: true
            }
        );

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("Table: customers"));
        assert!(prompts[0].contains("Generate SQLite queries"));
        assert!(prompts[1].contains("(showing the first 2 of 3 rows)"));
    }
}
