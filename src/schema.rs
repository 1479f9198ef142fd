//! Schema description shared by the prompt builders and the knowledge base

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as reported by the backend (e.g. "NVARCHAR(40)", "integer")
    pub data_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

impl ColumnInfo {
    /// Text-like columns are the ones worth sampling for autocorrection
    pub fn is_text(&self) -> bool {
        let upper = self.data_type.to_uppercase();
        ["TEXT", "CHAR", "CLOB", "STRING"]
            .iter()
            .any(|t| upper.contains(t))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Textual + structured schema of one backend connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub text: String,
    pub tables: BTreeMap<String, TableSchema>,
}

impl SchemaDescription {
    /// Build from structured tables, rendering the prompt text. `samples` holds up to
    /// a few example rows per table (header + rows already stringified).
    pub fn from_tables(
        tables: BTreeMap<String, TableSchema>,
        samples: &BTreeMap<String, (Vec<String>, Vec<Vec<String>>)>,
    ) -> Self {
        let text = render_schema_text(&tables, samples);
        Self { text, tables }
    }

    pub fn table(&self, name: &str) -> Option<(&String, &TableSchema)> {
        self.tables
            .iter()
            .find(|(table, _)| table.eq_ignore_ascii_case(name))
    }
}

fn render_schema_text(
    tables: &BTreeMap<String, TableSchema>,
    samples: &BTreeMap<String, (Vec<String>, Vec<Vec<String>>)>,
) -> String {
    let mut parts = vec!["=== DATABASE SCHEMA ===".to_string()];

    for (name, table) in tables {
        parts.push(format!("\n--- TABLE: {} ---", name));
        parts.push("Columns:".to_string());
        for column in &table.columns {
            let pk = if column.primary_key { " (PRIMARY KEY)" } else { "" };
            let not_null = if column.not_null { " NOT NULL" } else { "" };
            parts.push(format!("  - {}: {}{}{}", column.name, column.data_type, pk, not_null));
        }

        if !table.foreign_keys.is_empty() {
            parts.push("Foreign Keys:".to_string());
            for fk in &table.foreign_keys {
                parts.push(format!(
                    "  - {} -> {}.{}",
                    fk.column, fk.references_table, fk.references_column
                ));
            }
        }

        if let Some((headers, rows)) = samples.get(name) {
            if !rows.is_empty() {
                parts.push("Sample Data:".to_string());
                parts.push(format!("  Headers: {}", headers.join(", ")));
                for (i, row) in rows.iter().enumerate() {
                    parts.push(format!("  Row {}: {}", i + 1, row.join(", ")));
                }
            }
        }
    }

    parts.join("\n")
}
