use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One result row: column name to value, in the column order the engine
/// returned.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// States of a single pipeline run. The machine only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PipelineStage {
    Start,
    SchemaFetched,
    PromptBuilt,
    SqlGenerated,
    SqlExtracted,
    QueryExecuted,
    SummaryGenerated,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Start => "start",
            PipelineStage::SchemaFetched => "schema_fetched",
            PipelineStage::PromptBuilt => "prompt_built",
            PipelineStage::SqlGenerated => "sql_generated",
            PipelineStage::SqlExtracted => "sql_extracted",
            PipelineStage::QueryExecuted => "query_executed",
            PipelineStage::SummaryGenerated => "summary_generated",
            PipelineStage::Done => "done",
        }
    }
}

/// How much of the result was handed to the summarizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryPreview {
    pub rows_sent: usize,
    pub total_rows: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub asked_at: DateTime<Utc>,
}

/// Append-only question log owned by a chat session. Pipeline runs only see
/// a snapshot of the question texts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, question: impl Into<String>) -> &ConversationTurn {
        self.turns.push(ConversationTurn {
            question: question.into(),
            asked_at: Utc::now(),
        });
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Question texts, most recent last.
    pub fn questions(&self) -> Vec<String> {
        self.turns.iter().map(|t| t.question.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
