//! Embedded SQLite backend (rusqlite)
//!
//! One connection per backend, serialized behind an async mutex. The deadline
//! covers the wait for the connection too, but only a statement that holds the
//! connection is ever interrupted; a call still queued at its deadline never runs.

use super::{cell_to_string, Dialect, ExecutionOutcome, ResultSet, SqlBackend};
use crate::error::{Nl2SqlError, Result};
use crate::schema::{ColumnInfo, ForeignKey, SchemaDescription, TableSchema};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SAMPLE_ROWS: usize = 3;

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    label: String,
    timeout: Duration,
}

impl SqliteBackend {
    /// Open an existing database file. A missing file is an error, not a new database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Nl2SqlError::Backend(format!(
                "SQLite file not found: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        info!("Opened SQLite database {}", path.display());
        Ok(Self::from_connection(conn, path.display().to_string()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn, ":memory:".to_string()))
    }

    pub fn from_connection(conn: Connection, label: String) -> Self {
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            label,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run raw statements (fixtures, migrations) outside the query path
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self
            .conn
            .try_lock()
            .map_err(|_| Nl2SqlError::Backend("SQLite connection is busy".to_string()))?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn timed_out(&self) -> Nl2SqlError {
        Nl2SqlError::Backend(format!("Query timed out after {:?}", self.timeout))
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let guard = match tokio::time::timeout_at(deadline, Arc::clone(&self.conn).lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Gave up waiting for the SQLite connection of {}", self.label);
                return Err(self.timed_out());
            }
        };

        // The guard travels back with the result so the connection stays ours
        // until the interrupt below has been delivered.
        let timeout = self.timeout;
        let mut task = tokio::task::spawn_blocking(move || {
            if Instant::now() >= deadline {
                let err = Nl2SqlError::Backend(format!("Query timed out after {:?}", timeout));
                return (Err(err), guard);
            }
            let result = f(&guard);
            (result, guard)
        });

        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok((result, _guard))) => result,
            Ok(Err(join_error)) => Err(Nl2SqlError::Backend(format!(
                "SQLite worker failed: {}",
                join_error
            ))),
            Err(_) => {
                self.interrupt.interrupt();
                match task.await {
                    Ok((Ok(value), _guard)) => Ok(value),
                    _ => Err(self.timed_out()),
                }
            }
        }
    }
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<ResultSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(value_to_json(row.get_ref(i)?));
        }
        out.push(values);
    }

    Ok(ResultSet { columns, rows: out })
}

fn read_schema(conn: &Connection) -> Result<SchemaDescription> {
    let table_names: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        names
    };

    let mut tables = BTreeMap::new();
    let mut samples = BTreeMap::new();

    for table_name in table_names {
        let quoted = Dialect::Sqlite.quote_ident(&table_name);
        let mut table = TableSchema::default();

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quoted))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    data_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    not_null: row.get::<_, i64>(3)? != 0,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        table.primary_keys = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        table.columns = columns;

        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quoted))?;
        table.foreign_keys = stmt
            .query_map([], |row| {
                Ok(ForeignKey {
                    references_table: row.get(2)?,
                    column: row.get(3)?,
                    references_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match run_query(conn, &format!("SELECT * FROM {} LIMIT {}", quoted, SAMPLE_ROWS)) {
            Ok(rs) => {
                let rows: Vec<Vec<String>> = rs
                    .rows
                    .iter()
                    .map(|row| row.iter().map(cell_to_string).collect())
                    .collect();
                samples.insert(table_name.clone(), (rs.columns, rows));
            }
            Err(e) => warn!("Could not sample rows from {}: {}", table_name, e),
        }

        tables.insert(table_name, table);
    }

    Ok(SchemaDescription::from_tables(tables, &samples))
}

#[async_trait]
impl SqlBackend for SqliteBackend {
    fn name(&self) -> &str {
        &self.label
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn describe_schema(&self) -> Result<SchemaDescription> {
        let schema = self.with_connection(read_schema).await?;
        info!(
            "Schema loaded for {}: {} tables, {} characters",
            self.label,
            schema.tables.len(),
            schema.text.len()
        );
        Ok(schema)
    }

    async fn execute(&self, sql: &str) -> ExecutionOutcome {
        let sql_owned = sql.to_string();
        let result = self
            .with_connection(move |conn| run_query(conn, &sql_owned).map_err(Nl2SqlError::from))
            .await;

        match result {
            Ok(rs) => ExecutionOutcome::Success(rs),
            Err(Nl2SqlError::Sqlite(e)) => ExecutionOutcome::error(e.to_string()),
            Err(e) => {
                warn!("SQLite query failed: {}", e);
                ExecutionOutcome::error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch(
                r#"
                CREATE TABLE Artist (ArtistId INTEGER PRIMARY KEY, Name NVARCHAR(120));
                CREATE TABLE Album (
                    AlbumId INTEGER PRIMARY KEY,
                    Title NVARCHAR(160) NOT NULL,
                    ArtistId INTEGER NOT NULL REFERENCES Artist(ArtistId)
                );
                INSERT INTO Artist VALUES (1, 'AC/DC'), (2, 'Accept');
                INSERT INTO Album VALUES (1, 'For Those About To Rock', 1);
                "#,
            )
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_execute_success() {
        let backend = backend();
        match backend.execute("SELECT Name FROM Artist ORDER BY ArtistId;").await {
            ExecutionOutcome::Success(rs) => {
                assert_eq!(rs.columns, vec!["Name"]);
                assert_eq!(rs.rows, vec![vec![json!("AC/DC")], vec![json!("Accept")]]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_error_is_tagged() {
        let backend = backend();
        match backend.execute("SELECT Nme FROM Artist;").await {
            ExecutionOutcome::Error { message } => assert!(message.contains("no such column")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_describe_schema() {
        let schema = backend().describe_schema().await.unwrap();
        let (_, album) = schema.table("Album").unwrap();
        assert_eq!(album.primary_keys, vec!["AlbumId"]);
        assert_eq!(album.foreign_keys.len(), 1);
        assert_eq!(album.foreign_keys[0].references_table, "Artist");
        assert!(schema.text.contains("ArtistId -> Artist.ArtistId"));
        assert!(schema.text.contains("Row 1: 1, AC/DC"));
    }

    #[tokio::test]
    async fn test_queued_statement_times_out_without_running() {
        let backend = backend().with_timeout(Duration::from_millis(150));
        let held = Arc::clone(&backend.conn).lock_owned().await;

        match backend
            .execute("INSERT INTO Artist VALUES (3, 'Aerosmith') RETURNING ArtistId;")
            .await
        {
            ExecutionOutcome::Error { message } => {
                assert!(message.contains("Query timed out after 150ms"), "{}", message)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // the holder's own work is untouched
        held.execute_batch("INSERT INTO Artist VALUES (4, 'Audioslave');").unwrap();
        drop(held);

        match backend.execute("SELECT Name FROM Artist ORDER BY ArtistId;").await {
            ExecutionOutcome::Success(rs) => assert_eq!(
                rs.rows,
                vec![vec![json!("AC/DC")], vec![json!("Accept")], vec![json!("Audioslave")]]
            ),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runaway_statement_is_interrupted() {
        let backend = backend().with_timeout(Duration::from_millis(200));
        let outcome = backend
            .execute("WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT COUNT(*) FROM n;")
            .await;
        match outcome {
            ExecutionOutcome::Error { message } => {
                assert!(message.contains("Query timed out after 200ms"), "{}", message)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        match backend.execute("SELECT COUNT(*) FROM Album;").await {
            ExecutionOutcome::Success(rs) => assert_eq!(rs.rows, vec![vec![json!(1)]]),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(SqliteBackend::open("/definitely/not/here.sqlite").is_err());
    }
}
