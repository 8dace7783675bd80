use crate::domain::pipeline::{QueryResult, SummaryPreview};
use crate::infrastructure::response::clean_llm_response;

/// Returned in place of a summary that came back empty.
pub const SUMMARY_FALLBACK: &str = "Summary not available.";

/// Turns a query result into a summary prompt and cleans the reply.
///
/// Only the first `preview_rows` rows are ever sent to the model.
#[derive(Debug, Clone)]
pub struct SummaryBuilder {
    preview_rows: usize,
}

impl SummaryBuilder {
    pub fn new(preview_rows: usize) -> Self {
        Self { preview_rows }
    }

    pub fn preview_rows(&self) -> usize {
        self.preview_rows
    }

    pub fn preview(&self, result: &QueryResult) -> SummaryPreview {
        let total_rows = result.row_count();
        let rows_sent = total_rows.min(self.preview_rows);
        SummaryPreview {
            rows_sent,
            total_rows,
            truncated: total_rows > rows_sent,
        }
    }

    pub fn build_prompt(&self, question: &str, result: &QueryResult) -> (String, SummaryPreview) {
        let preview = self.preview(result);
        let rows = serde_json::Value::from(result.rows[..preview.rows_sent].to_vec());

        let mut prompt = format!("Summarize these results: {}\n\n", rows);
        prompt.push_str(&format!(
            "The results answer the question: \"{}\"\n",
            question.trim()
        ));

        if preview.total_rows == 0 {
            prompt.push_str("The query returned no rows.\n");
        } else if preview.truncated {
            prompt.push_str(&format!(
                "(showing the first {} of {} rows)\n",
                preview.rows_sent, preview.total_rows
            ));
        }

        prompt.push_str("Reply with a short plain-text summary.");

        (prompt, preview)
    }

    /// Strips reasoning segments; never returns an empty string.
    pub fn finalize(&self, raw: &str) -> String {
        let cleaned = clean_llm_response(raw);
        if cleaned.is_empty() {
            SUMMARY_FALLBACK.to_string()
        } else {
            cleaned
        }
    }
}

impl Default for SummaryBuilder {
    fn default() -> Self {
        Self::new(3)
    }
}
