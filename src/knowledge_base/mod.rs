//! Knowledge Base - what the database actually contains
//!
//! Built by sampling the connected database: schema, explicit and implicit
//! relationships, the most frequent values of every text column and their
//! detected shapes. Autocorrection matches user-typed literals against the
//! sampled values.
//!
//! Readers take an `Arc` of the current snapshot and never block a refresh; a
//! refresh builds a new snapshot off to the side and swaps it in whole.

pub mod history;
pub mod matcher;
pub mod patterns;
pub mod store;

pub use history::{CorrectionEntry, CorrectionHistory, CorrectionPatterns};
pub use matcher::DEFAULT_THRESHOLD;
pub use patterns::ValueShape;
pub use store::KnowledgeStore;

use crate::backend::{cell_to_string, ExecutionOutcome, SqlBackend};
use crate::entities::Correction;
use crate::error::Result;
use crate::schema::TableSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Tables above this many rows are sampled through a bounded subquery
pub const LARGE_TABLE_ROWS: i64 = 10_000;
pub const LARGE_TABLE_SAMPLE: usize = 1_000;
/// Distinct values kept per text column
pub const MAX_COMMON_VALUES: usize = 100;
pub const IMPLICIT_CONFIDENCE: f64 = 0.8;
pub const TABLE_MATCH_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueFrequency {
    pub value: String,
    pub frequency: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TablePatterns {
    pub row_count: u64,
    /// Text column -> shapes detected over its most frequent values
    pub columns: BTreeMap<String, Vec<ValueShape>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ForeignKey,
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeMetadata {
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub total_tables: usize,
}

/// Immutable view of everything learned about one database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnapshot {
    pub schema: BTreeMap<String, TableSchema>,
    pub data_patterns: BTreeMap<String, TablePatterns>,
    /// table -> column -> values by descending frequency
    pub common_values: BTreeMap<String, BTreeMap<String, Vec<ValueFrequency>>>,
    pub relationships: Vec<Relationship>,
    pub metadata: KnowledgeMetadata,
}

impl KnowledgeSnapshot {
    pub fn empty(source: &str) -> Self {
        Self {
            schema: BTreeMap::new(),
            data_patterns: BTreeMap::new(),
            common_values: BTreeMap::new(),
            relationships: Vec::new(),
            metadata: KnowledgeMetadata {
                created_at: Utc::now(),
                source: source.to_string(),
                total_tables: 0,
            },
        }
    }

    /// Sample the backend and assemble a fresh snapshot
    pub async fn build(backend: &dyn SqlBackend) -> Result<Self> {
        let schema = backend.describe_schema().await?;
        let dialect = backend.dialect();
        let mut snapshot = Self::empty(backend.name());
        snapshot.metadata.total_tables = schema.tables.len();

        for (table_name, table) in &schema.tables {
            info!("Analyzing table '{}'", table_name);
            let quoted_table = dialect.quote_ident(table_name);

            let row_count = match backend
                .execute(&format!("SELECT COUNT(*) FROM {}", quoted_table))
                .await
            {
                ExecutionOutcome::Success(rs) => rs.scalar_i64().unwrap_or(0),
                ExecutionOutcome::Error { message } => {
                    warn!("Could not count rows of {}: {}", table_name, message);
                    continue;
                }
            };

            let mut table_patterns = TablePatterns {
                row_count: row_count.max(0) as u64,
                columns: BTreeMap::new(),
            };
            let mut table_values = BTreeMap::new();

            for column in table.columns.iter().filter(|c| c.is_text()) {
                let quoted_column = dialect.quote_ident(&column.name);
                let source = if row_count > LARGE_TABLE_ROWS {
                    format!(
                        "(SELECT {} FROM {} LIMIT {}) AS sampled",
                        quoted_column, quoted_table, LARGE_TABLE_SAMPLE
                    )
                } else {
                    quoted_table.clone()
                };
                let sql = format!(
                    "SELECT {col}, COUNT(*) AS freq FROM {src} WHERE {col} IS NOT NULL \
                     GROUP BY {col} ORDER BY freq DESC, {col} LIMIT {limit}",
                    col = quoted_column,
                    src = source,
                    limit = MAX_COMMON_VALUES
                );

                let values: Vec<ValueFrequency> = match backend.execute(&sql).await {
                    ExecutionOutcome::Success(rs) => rs
                        .rows
                        .iter()
                        .filter_map(|row| {
                            let value = cell_to_string(row.first()?);
                            let frequency = row.get(1).and_then(|f| f.as_u64()).unwrap_or(0);
                            Some(ValueFrequency { value, frequency })
                        })
                        .collect(),
                    ExecutionOutcome::Error { message } => {
                        warn!("Could not sample {}.{}: {}", table_name, column.name, message);
                        continue;
                    }
                };
                if values.is_empty() {
                    continue;
                }

                let shapes = patterns::detect_shapes(
                    &values.iter().map(|v| v.value.as_str()).collect::<Vec<_>>(),
                );
                if !shapes.is_empty() {
                    debug!("{}.{} looks like {:?}", table_name, column.name, shapes);
                    table_patterns.columns.insert(column.name.clone(), shapes);
                }
                table_values.insert(column.name.clone(), values);
            }

            snapshot.data_patterns.insert(table_name.clone(), table_patterns);
            snapshot.common_values.insert(table_name.clone(), table_values);
        }

        snapshot.relationships = infer_relationships(&schema.tables);
        snapshot.schema = schema.tables;

        info!(
            "Knowledge base built: {} tables, {} relationships",
            snapshot.schema.len(),
            snapshot.relationships.len()
        );
        Ok(snapshot)
    }

    /// Case-insensitive table lookup, returning the stored name
    pub fn resolve_table(&self, name: &str) -> Option<&str> {
        self.schema
            .keys()
            .find(|t| t.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Sampled values of `table.column`, both resolved case-insensitively
    pub fn values(&self, table: &str, column: &str) -> Option<&[ValueFrequency]> {
        let table_name = self.resolve_table(table)?;
        self.common_values
            .get(table_name)?
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, values)| values.as_slice())
    }

    pub fn find_best_match(
        &self,
        value: &str,
        table: &str,
        column: &str,
        threshold: f64,
    ) -> Option<(String, f64)> {
        let values = match self.values(table, column) {
            Some(values) => values,
            None => {
                debug!("No sampled values for {}.{}", table, column);
                return None;
            }
        };
        let found = matcher::best_match(value, values, threshold);
        if let Some((matched, score)) = &found {
            debug!("'{}' matched '{}' in {}.{} ({:.3})", value, matched, table, column, score);
        }
        found
    }

    /// Closest table name by normalized similarity, at least 0.7
    pub fn find_closest_table(&self, name: &str) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for table_name in self.schema.keys() {
            let score = matcher::normalized_similarity(name, table_name);
            if score < TABLE_MATCH_THRESHOLD {
                continue;
            }
            if best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((table_name.clone(), score));
            }
        }
        best
    }
}

/// Declared foreign keys, plus `<table>...Id` columns that name another table
fn infer_relationships(tables: &BTreeMap<String, TableSchema>) -> Vec<Relationship> {
    let mut relationships: Vec<Relationship> = tables
        .iter()
        .flat_map(|(table_name, table)| {
            table.foreign_keys.iter().map(move |fk| Relationship {
                from_table: table_name.clone(),
                from_column: fk.column.clone(),
                to_table: fk.references_table.clone(),
                to_column: fk.references_column.clone(),
                kind: RelationshipKind::ForeignKey,
                confidence: None,
            })
        })
        .collect();

    for (from_table, from_schema) in tables {
        for from_column in &from_schema.columns {
            let from_lower = from_column.name.to_lowercase();
            if !from_lower.ends_with("id") {
                continue;
            }
            for (to_table, to_schema) in tables {
                if to_table == from_table || !from_lower.contains(&to_table.to_lowercase()) {
                    continue;
                }
                for to_column in &to_schema.columns {
                    if to_column.name.to_lowercase().ends_with("id") {
                        relationships.push(Relationship {
                            from_table: from_table.clone(),
                            from_column: from_column.name.clone(),
                            to_table: to_table.clone(),
                            to_column: to_column.name.clone(),
                            kind: RelationshipKind::Implicit,
                            confidence: Some(IMPLICIT_CONFIDENCE),
                        });
                    }
                }
            }
        }
    }

    relationships
}

/// Shared, refreshable knowledge base for one connection
pub struct KnowledgeBase {
    snapshot: RwLock<Arc<KnowledgeSnapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
    history: Mutex<CorrectionHistory>,
    store: KnowledgeStore,
}

impl KnowledgeBase {
    pub fn from_snapshot(snapshot: KnowledgeSnapshot, store: KnowledgeStore) -> Self {
        let history = CorrectionHistory::from_entries(store.load_history());
        if !history.is_empty() {
            info!("Loaded {} correction history entries", history.len());
        }
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            refresh_lock: tokio::sync::Mutex::new(()),
            history: Mutex::new(history),
            store,
        }
    }

    /// Load the persisted snapshot, or build one from the backend and save it
    pub async fn load_or_build(backend: &dyn SqlBackend, store: KnowledgeStore) -> Result<Self> {
        if let Some(snapshot) = store.load_snapshot() {
            return Ok(Self::from_snapshot(snapshot, store));
        }

        info!("Building new knowledge base from {}", backend.name());
        let snapshot = KnowledgeSnapshot::build(backend).await?;
        if let Err(e) = store.save_snapshot(&snapshot) {
            warn!("Could not save knowledge base: {}", e);
        }
        Ok(Self::from_snapshot(snapshot, store))
    }

    /// Current snapshot. Stays valid across refreshes.
    pub fn snapshot(&self) -> Arc<KnowledgeSnapshot> {
        let guard = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Rebuild from the backend and swap the new snapshot in. Concurrent refreshes
    /// are serialized; readers see either the old or the new snapshot, never a mix.
    pub async fn refresh(&self, backend: &dyn SqlBackend) -> Result<()> {
        let _writer = self.refresh_lock.lock().await;
        info!("Refreshing knowledge base from {}", backend.name());

        let fresh = KnowledgeSnapshot::build(backend).await?;
        self.store.save_snapshot(&fresh)?;

        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(fresh);
        Ok(())
    }

    pub fn find_best_match(
        &self,
        value: &str,
        table: &str,
        column: &str,
        threshold: f64,
    ) -> Option<(String, f64)> {
        self.snapshot().find_best_match(value, table, column, threshold)
    }

    pub fn find_closest_table(&self, name: &str) -> Option<(String, f64)> {
        self.snapshot().find_closest_table(name)
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn record_corrections(&self, query: &str, corrections: &[Correction]) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.record(query, corrections, &self.store);
    }

    pub fn analyze_correction_patterns(&self) -> CorrectionPatterns {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.analyze_patterns()
    }

    /// Write the correction log regardless of the flush cadence
    pub fn flush_history(&self) -> Result<()> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        self.store.save_history(history.entries())
    }

    /// Human-readable summary of the knowledge base and correction history
    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        let rule = "-".repeat(50);
        let mut lines = vec![
            "=".repeat(70),
            "AUTOCORRECT KNOWLEDGE BASE REPORT".to_string(),
            "=".repeat(70),
            format!("Generated at: {}", Utc::now().to_rfc3339()),
            format!("Database: {}", snapshot.metadata.source),
            format!("Built at: {}", snapshot.metadata.created_at.to_rfc3339()),
            String::new(),
            "SCHEMA SUMMARY:".to_string(),
            rule.clone(),
        ];

        for (table_name, table) in &snapshot.schema {
            lines.push(String::new());
            lines.push(format!("Table: {}", table_name));
            lines.push(format!("  Columns: {}", table.columns.len()));
            lines.push(format!("  Primary Keys: {}", table.primary_keys.join(", ")));
            lines.push(format!("  Foreign Keys: {}", table.foreign_keys.len()));
            if let Some(row_count) = snapshot.data_patterns.get(table_name).map(|p| p.row_count) {
                lines.push(format!("  Rows: {}", row_count));
            }

            if let Some(columns) = snapshot.common_values.get(table_name) {
                if !columns.is_empty() {
                    lines.push("  Sample Values:".to_string());
                }
                for (column, values) in columns.iter().take(3) {
                    if let Some(first) = values.first() {
                        lines.push(format!(
                            "    {}: '{}' (and {} more)",
                            column,
                            first.value,
                            values.len() - 1
                        ));
                    }
                }
            }
        }

        lines.push(String::new());
        lines.push("RELATIONSHIPS:".to_string());
        lines.push(rule.clone());
        for rel in snapshot.relationships.iter().take(10) {
            let kind = match rel.kind {
                RelationshipKind::ForeignKey => "foreign_key",
                RelationshipKind::Implicit => "implicit",
            };
            lines.push(format!(
                "{}.{} -> {}.{} ({})",
                rel.from_table, rel.from_column, rel.to_table, rel.to_column, kind
            ));
        }

        let patterns = self.analyze_correction_patterns();
        lines.push(String::new());
        lines.push("CORRECTION PATTERNS:".to_string());
        lines.push(rule);
        lines.push(format!("Total Corrections: {}", patterns.total_corrections));
        if !patterns.common_mistakes.is_empty() {
            lines.push("Common Mistakes:".to_string());
            for (mistake, count) in patterns.common_mistakes.iter().take(5) {
                lines.push(format!("  {}: {} times", mistake, count));
            }
        }

        lines.join("\n")
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("store", &self.store)
            .field("tables", &self.snapshot().schema.len())
            .finish()
    }
}
