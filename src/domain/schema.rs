use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Point-in-time listing of tables and their columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: Vec<String>,
    columns: HashMap<String, Vec<ColumnDescriptor>>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a table; a repeated name replaces the earlier column list but
    /// keeps its original position.
    pub fn with_table(mut self, name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        let name = name.into();
        if !self.columns.contains_key(&name) {
            self.tables.push(name.clone());
        }
        self.columns.insert(name, columns);
        self
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn columns(&self, table: &str) -> &[ColumnDescriptor] {
        self.columns.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Deterministic text listing embedded in generation prompts.
    pub fn render(&self) -> String {
        if self.tables.is_empty() {
            return "(no tables found)".to_string();
        }

        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "Table: {}", table);
            let columns = self.columns(table);
            if columns.is_empty() {
                out.push_str("  (no columns)\n");
            }
            for column in columns {
                let _ = writeln!(
                    out,
                    "  - {} ({}, {})",
                    column.name,
                    column.data_type,
                    if column.nullable { "NULL" } else { "NOT NULL" }
                );
            }
        }
        out.trim_end().to_string()
    }
}
