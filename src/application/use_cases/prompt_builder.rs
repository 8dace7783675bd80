//! SQL generation prompt.
//!
//! Pure string assembly: the same schema, question and history always give
//! the same prompt.

use crate::domain::db_connection::DbKind;
use crate::domain::schema::SchemaSnapshot;

/// Build the prompt asking the model for one SQL statement.
///
/// `history` holds the prior question texts, most recent last.
pub fn build_sql_prompt(
    schema: &SchemaSnapshot,
    question: &str,
    history: &[String],
    engine: DbKind,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You are a SQL expert. Generate {} queries based on this database schema.\n\n",
        engine.dialect()
    ));

    prompt.push_str("Schema:\n");
    prompt.push_str(&schema.render());
    prompt.push_str("\n\n");

    prompt.push_str("Previous conversation:\n");
    prompt.push_str(&render_history(history));
    prompt.push_str("\n\n");

    prompt.push_str(&format!("Question: {}\n\n", question.trim()));

    prompt.push_str("Rules:\n");
    prompt.push_str(
        "- Output ONLY the SQL query, as a single statement on a single line, without any explanations or markdown.\n",
    );
    prompt.push_str(&format!(
        "- The query must be valid {} and start with SELECT or WITH.\n",
        engine.dialect()
    ));
    prompt.push_str("- Use unquoted identifiers. Do not enclose table names in single quotes.\n");
    prompt.push_str("- Count distinct values with COUNT(DISTINCT column).\n");
    prompt.push_str("- Make sure to use proper JOINs and WHERE clauses as needed.\n");
    prompt.push_str(dialect_hint(engine));

    prompt
}

fn render_history(history: &[String]) -> String {
    let lines: Vec<String> = history
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(|q| format!("- {}", q))
        .collect();

    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}

fn dialect_hint(engine: DbKind) -> &'static str {
    match engine {
        DbKind::Postgresql => {
            "- Use ILIKE for case-insensitive text matching.\n"
        }
        DbKind::Sqlite => {
            "- Use LIKE for text matching and strftime() for date parts.\n"
        }
    }
}
