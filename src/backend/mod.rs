//! Backend contract - schema introspection and SQL execution
//!
//! The refinement core only ever talks to a `SqlBackend`. Whether the rows come
//! from an embedded SQLite file or a PostgreSQL server is invisible to it, and it
//! only emits ANSI-basic SQL of its own (row counts, distinct-value sampling).

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use crate::error::{Nl2SqlError, Result};
use crate::schema::SchemaDescription;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Columns and rows of a successful execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First cell as an integer, used for `SELECT COUNT(*)` style queries
    pub fn scalar_i64(&self) -> Option<i64> {
        let cell = self.rows.first()?.first()?;
        cell.as_i64()
            .or_else(|| cell.as_str().and_then(|s| s.parse().ok()))
    }
}

/// Tagged execution result. Backends never raise past this boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success(ResultSet),
    Error { message: String },
}

impl ExecutionOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        ExecutionOutcome::Error {
            message: message.into(),
        }
    }
}

/// SQL flavour of a backend, used only for catalog templates and identifier quoting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Table listing for "list tables" style questions
    pub fn list_tables_sql(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name;",
            Dialect::Postgres => {
                "SELECT table_name FROM information_schema.tables WHERE table_schema = current_schema() ORDER BY table_name;"
            }
        }
    }

    /// Catalog overview for "database name" style questions
    pub fn catalog_overview_sql(&self) -> &'static str {
        match self {
            Dialect::Sqlite => {
                "SELECT name, type FROM sqlite_master WHERE type='table' ORDER BY name;"
            }
            Dialect::Postgres => {
                "SELECT current_database() AS database_name, table_name, table_type FROM information_schema.tables WHERE table_schema = current_schema() ORDER BY table_name;"
            }
        }
    }

    /// ANSI double-quoted identifier
    pub fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "SQLite"),
            Dialect::Postgres => write!(f, "PostgreSQL"),
        }
    }
}

/// Schema/execution collaborator. Implementations must be safe to share between
/// concurrently running orchestrators; they serialize or pool access internally.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Short label for logs (file path, database name)
    fn name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Structured + textual schema of the connected database
    async fn describe_schema(&self) -> Result<SchemaDescription>;

    /// Run one statement. Errors and timeouts come back as `ExecutionOutcome::Error`.
    async fn execute(&self, sql: &str) -> ExecutionOutcome;
}

/// Where a database URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Sqlite(PathBuf),
    Postgres(String),
}

impl DatabaseTarget {
    /// Accepts `sqlite:path`, `sqlite://path`, `postgres://...`, `postgresql://...`
    /// or a bare file path (SQLite).
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Nl2SqlError::Config("empty database URL".to_string()));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(DatabaseTarget::Postgres(url.to_string()));
        }
        if let Some(path) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) {
            if path.is_empty() {
                return Err(Nl2SqlError::Config(format!("missing SQLite path in '{}'", url)));
            }
            return Ok(DatabaseTarget::Sqlite(PathBuf::from(path)));
        }
        if url.contains("://") {
            return Err(Nl2SqlError::Config(format!(
                "unsupported database URL '{}' (expected sqlite: or postgres://)",
                url
            )));
        }
        Ok(DatabaseTarget::Sqlite(PathBuf::from(url)))
    }
}

/// Open the backend a database URL points at
pub async fn connect_backend(
    url: &str,
    pg_schema: &str,
    timeout: Duration,
) -> Result<Arc<dyn SqlBackend>> {
    match DatabaseTarget::parse(url)? {
        DatabaseTarget::Sqlite(path) => {
            Ok(Arc::new(SqliteBackend::open(path)?.with_timeout(timeout)))
        }
        DatabaseTarget::Postgres(url) => {
            Ok(Arc::new(PostgresBackend::connect(&url, pg_schema, timeout).await?))
        }
    }
}

/// Stringify a JSON cell the way schema samples and the knowledge base want it
pub(crate) fn cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
