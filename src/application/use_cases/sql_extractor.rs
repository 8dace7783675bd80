//! Picks the SQL statement out of free-form generated text.
//!
//! A line qualifies when, after trimming, it has the shape
//!
//! ```text
//! (SELECT | WITH) WS+ <anything> WS+ FROM WS+ ['|"]? IDENT
//! ```
//!
//! where keywords are case-insensitive and `IDENT` is one or more
//! alphanumeric, `_` or `.` characters. The first qualifying line wins.
//! This checks shape only; the database decides whether the statement is
//! actually valid.

use crate::domain::error::ExtractionError;
use serde::Serialize;
use std::fmt;

const LEADING_KEYWORDS: [&str; 2] = ["SELECT", "WITH"];
const FROM_KEYWORD: &str = "FROM";
const TERMINATOR: char = ';';

/// A single shape-checked SQL statement ending in `;`.
///
/// Only [`extract_sql_query`] can build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExtractedQuery(String);

impl ExtractedQuery {
    fn terminated(statement: &str) -> Self {
        if statement.ends_with(TERMINATOR) {
            Self(statement.to_string())
        } else {
            Self(format!("{}{}", statement, TERMINATOR))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ExtractedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ExtractedQuery {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returns the first SQL-shaped line of `raw`, terminated.
pub fn extract_sql_query(raw: &str) -> Result<ExtractedQuery, ExtractionError> {
    raw.lines()
        .map(|line| first_statement(line.trim()))
        .find(|candidate| is_query_shaped(candidate))
        .map(ExtractedQuery::terminated)
        .ok_or(ExtractionError::NoValidSqlFound)
}

/// Cuts a line after its first terminator that is not inside a quoted
/// literal or identifier. Understands `'..'` (with `E'..'` backslash
/// escapes), `".."` and PostgreSQL dollar quoting (`$$..$$`, `$tag$..$tag$`).
fn first_statement(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        i = match bytes[i] {
            b';' => return &line[..=i],
            b'\'' => {
                let escapes = i > 0
                    && matches!(bytes[i - 1], b'E' | b'e')
                    && (i < 2 || !is_ident_byte(bytes[i - 2]));
                skip_quoted(bytes, i, b'\'', escapes)
            }
            b'"' => skip_quoted(bytes, i, b'"', false),
            b'$' if i == 0 || !is_ident_byte(bytes[i - 1]) => match dollar_tag_len(&bytes[i..]) {
                Some(tag_len) => skip_dollar_quoted(bytes, i, tag_len),
                None => i + 1,
            },
            _ => i + 1,
        };
    }
    line
}

/// Index just past the literal opened at `start`, or the end of input when
/// it is never closed. A doubled quote closes and reopens, which lands in
/// the same place.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, escapes: bool) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        if escapes && bytes[j] == b'\\' {
            j += 2;
            continue;
        }
        if bytes[j] == quote {
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

/// Length of a dollar-quote opener (`$$` or `$tag$`) at the start of
/// `text`. Positional parameters such as `$1` are not openers.
fn dollar_tag_len(text: &[u8]) -> Option<usize> {
    match text.get(1)? {
        b'$' => Some(2),
        c if c.is_ascii_alphabetic() || *c == b'_' => {
            let end = 1 + text[1..].iter().take_while(|b| is_ident_byte(**b)).count();
            (text.get(end) == Some(&b'$')).then_some(end + 1)
        }
        _ => None,
    }
}

fn skip_dollar_quoted(bytes: &[u8], start: usize, tag_len: usize) -> usize {
    let tag = &bytes[start..start + tag_len];
    let body = start + tag_len;
    bytes[body..]
        .windows(tag_len)
        .position(|window| window == tag)
        .map(|offset| body + offset + tag_len)
        .unwrap_or(bytes.len())
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_query_shaped(candidate: &str) -> bool {
    LEADING_KEYWORDS
        .iter()
        .filter_map(|keyword| strip_keyword(candidate, keyword))
        .any(has_from_clause)
}

/// Case-insensitive keyword prefix match.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(&text[keyword.len()..])
    } else {
        None
    }
}

/// `rest` is what follows the leading keyword. It needs whitespace right
/// after the keyword and whitespace right before `FROM`; with an empty body
/// those are two distinct characters.
fn has_from_clause(rest: &str) -> bool {
    if !rest.starts_with(char::is_whitespace) {
        return false;
    }

    rest.char_indices()
        .skip(1)
        .filter(|(_, c)| c.is_whitespace())
        .any(|(i, c)| names_a_source(&rest[i + c.len_utf8()..]))
}

fn names_a_source(text: &str) -> bool {
    let Some(after) = strip_keyword(text, FROM_KEYWORD) else {
        return false;
    };
    if !after.starts_with(char::is_whitespace) {
        return false;
    }

    let target = after.trim_start();
    let target = target.strip_prefix(&['\'', '"'][..]).unwrap_or(target);
    target.starts_with(is_ident_char)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(raw: &str) -> String {
        extract_sql_query(raw).unwrap().into_string()
    }

    #[test]
    fn test_first_match_wins() {
        let raw = "Explanation...\nSELECT a FROM t\nSELECT b FROM u";
        assert_eq!(extract(raw), "SELECT a FROM t;");
    }

    #[test]
    fn test_terminator_not_doubled() {
        assert_eq!(extract("SELECT a FROM t;"), "SELECT a FROM t;");
        let once = extract("Here you go:\nSELECT a FROM t");
        assert_eq!(extract(&once), once);
    }

    #[test]
    fn test_prose_only_is_rejected() {
        let raw = "I could not find a table that answers this.\nPlease select a different question from the list.";
        assert_eq!(
            extract_sql_query(raw),
            Err(ExtractionError::NoValidSqlFound)
        );
        assert_eq!(extract_sql_query(""), Err(ExtractionError::NoValidSqlFound));
    }

    #[test]
    fn test_case_insensitive_and_trimmed() {
        assert_eq!(
            extract("   select name from customers   "),
            "select name from customers;"
        );
        assert_eq!(extract("Select a From t"), "Select a From t;");
    }

    #[test]
    fn test_with_cte() {
        let raw = "WITH totals AS (SELECT customer_id, SUM(total) AS s FROM orders GROUP BY customer_id) SELECT * FROM totals";
        assert_eq!(extract(raw), format!("{};", raw));
    }

    #[test]
    fn test_quoted_and_qualified_identifiers() {
        assert_eq!(
            extract("SELECT * FROM \"Orders\""),
            "SELECT * FROM \"Orders\";"
        );
        assert_eq!(extract("SELECT * FROM 'orders'"), "SELECT * FROM 'orders';");
        assert_eq!(
            extract("SELECT id FROM public.orders"),
            "SELECT id FROM public.orders;"
        );
    }

    #[test]
    fn test_markdown_fence_lines_are_skipped() {
        let raw = "```sql\nSELECT customer_id, COUNT(*) FROM orders GROUP BY customer_id\n```";
        assert_eq!(
            extract(raw),
            "SELECT customer_id, COUNT(*) FROM orders GROUP BY customer_id;"
        );
    }

    #[test]
    fn test_batch_is_cut_to_first_statement() {
        assert_eq!(
            extract("SELECT a FROM t; DROP TABLE t;"),
            "SELECT a FROM t;"
        );
        assert_eq!(
            extract("SELECT a FROM t WHERE b = 'x;y'; DELETE FROM t"),
            "SELECT a FROM t WHERE b = 'x;y';"
        );
    }

    #[test]
    fn test_dollar_quoted_literals_keep_their_semicolons() {
        assert_eq!(extract("SELECT $$a;b$$ FROM t"), "SELECT $$a;b$$ FROM t;");
        assert_eq!(
            extract("SELECT $fn$x; y$fn$ AS body FROM t; DROP TABLE t"),
            "SELECT $fn$x; y$fn$ AS body FROM t;"
        );
        assert_eq!(
            extract("SELECT a FROM t WHERE id = $1; DROP TABLE t"),
            "SELECT a FROM t WHERE id = $1;"
        );
    }

    #[test]
    fn test_escape_string_literal_keeps_its_semicolons() {
        assert_eq!(
            extract(r"SELECT a FROM t WHERE b = E'it\';s'; DELETE FROM t"),
            r"SELECT a FROM t WHERE b = E'it\';s';"
        );
        // Without the E prefix a backslash is an ordinary character.
        assert_eq!(
            extract(r"SELECT a FROM t WHERE b = 'x\'; DELETE FROM t"),
            r"SELECT a FROM t WHERE b = 'x\';"
        );
    }

    #[test]
    fn test_batch_whose_first_statement_lacks_from_is_skipped() {
        let raw = "SELECT 1; SELECT a FROM t\nSELECT b FROM u";
        assert_eq!(extract(raw), "SELECT b FROM u;");
    }

    #[test]
    fn test_shape_requirements() {
        for raw in [
            "SELECT FROM t",
            "SELECTED a FROM t",
            "SELECT a FROMt",
            "SELECT a FROM ",
            "SELECT a FROM (SELECT 1)",
            "Sure! SELECT a FROM t",
            "INSERT INTO t SELECT a FROM u",
            "SELECT 1",
        ] {
            assert_eq!(
                extract_sql_query(raw),
                Err(ExtractionError::NoValidSqlFound),
                "{raw:?} should not match"
            );
        }
        assert_eq!(extract("SELECT  FROM t"), "SELECT  FROM t;");
    }

    #[test]
    fn test_non_ascii_text_does_not_panic() {
        let raw = "Réponse: voilà\nSELECT prénom FROM clients";
        assert_eq!(extract(raw), "SELECT prénom FROM clients;");
        assert!(extract_sql_query("sé").is_err());
    }

    #[test]
    fn test_display_matches_statement() {
        let query = extract_sql_query("SELECT a FROM t").unwrap();
        assert_eq!(query.to_string(), "SELECT a FROM t;");
        assert_eq!(serde_json::to_value(&query).unwrap(), "SELECT a FROM t;");
    }
}
