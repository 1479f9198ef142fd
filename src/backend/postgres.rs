//! PostgreSQL backend (sqlx)
//!
//! Access goes through a `PgPool`, so concurrent orchestrators never share a
//! connection. Every pooled connection resolves unqualified names in the
//! configured schema. Every statement is bounded by the configured timeout.

use super::{cell_to_string, Dialect, ExecutionOutcome, ResultSet, SqlBackend};
use crate::error::{Nl2SqlError, Result};
use crate::schema::{ColumnInfo, ForeignKey, SchemaDescription, TableSchema};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Row, TypeInfo};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

const SAMPLE_ROWS: usize = 3;

fn search_path_sql(schema: &str) -> String {
    format!("SET search_path TO {}", Dialect::Postgres.quote_ident(schema))
}

/// Whole numbers stay integers; anything an f64 cannot hold is kept as text
fn numeric_to_json(value: Decimal) -> serde_json::Value {
    let value = value.normalize();
    if value.scale() == 0 {
        if let Some(n) = value.to_i64() {
            return serde_json::Value::from(n);
        }
    }
    value
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(value.to_string()))
}

pub struct PostgresBackend {
    pool: PgPool,
    schema: String,
    label: String,
    timeout: Duration,
}

impl PostgresBackend {
    /// Connect a pool and verify it with `SELECT 1`
    pub async fn connect(database_url: &str, schema: &str, timeout: Duration) -> Result<Self> {
        let set_search_path = search_path_sql(schema);
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(timeout)
            .after_connect(move |conn, _meta| {
                let statement = set_search_path.clone();
                Box::pin(async move {
                    conn.execute(statement.as_str()).await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        let label = database_url
            .rsplit('/')
            .next()
            .unwrap_or("postgres")
            .split('?')
            .next()
            .unwrap_or("postgres")
            .to_string();
        info!("Connected to PostgreSQL database '{}' (schema {})", label, schema);

        Ok(Self {
            pool,
            schema: schema.to_string(),
            label,
            timeout,
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(Nl2SqlError::from),
            Err(_) => Err(Nl2SqlError::Backend(format!(
                "Query timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn run_query(&self, sql: &str) -> Result<ResultSet> {
        let rows: Vec<PgRow> = self.bounded(sqlx::query(sql).fetch_all(&self.pool)).await?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => {
                // No rows to read column names from; ask the server instead
                let described = self.bounded((&self.pool).describe(sql)).await?;
                described
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            }
        };

        let rows = rows
            .iter()
            .map(|row| (0..row.columns().len()).map(|i| decode_cell(row, i)).collect())
            .collect();

        Ok(ResultSet { columns, rows })
    }

    async fn load_table(&self, table_name: &str) -> Result<TableSchema> {
        let column_rows: Vec<(String, String, String)> = self
            .bounded(
                sqlx::query_as(
                    r#"
                    SELECT column_name::text, data_type::text, is_nullable::text
                    FROM information_schema.columns
                    WHERE table_schema = $1 AND table_name = $2
                    ORDER BY ordinal_position
                    "#,
                )
                .bind(&self.schema)
                .bind(table_name)
                .fetch_all(&self.pool),
            )
            .await?;

        let primary_keys: Vec<String> = self
            .bounded(
                sqlx::query_scalar(
                    r#"
                    SELECT kcu.column_name::text
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                      ON tc.constraint_name = kcu.constraint_name
                     AND tc.table_schema = kcu.table_schema
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                      AND tc.table_schema = $1 AND tc.table_name = $2
                    ORDER BY kcu.ordinal_position
                    "#,
                )
                .bind(&self.schema)
                .bind(table_name)
                .fetch_all(&self.pool),
            )
            .await?;

        let fk_rows: Vec<(String, String, String)> = self
            .bounded(
                sqlx::query_as(
                    r#"
                    SELECT kcu.column_name::text, ccu.table_name::text, ccu.column_name::text
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                      ON tc.constraint_name = kcu.constraint_name
                     AND tc.table_schema = kcu.table_schema
                    JOIN information_schema.constraint_column_usage ccu
                      ON ccu.constraint_name = tc.constraint_name
                     AND ccu.table_schema = tc.table_schema
                    WHERE tc.constraint_type = 'FOREIGN KEY'
                      AND tc.table_schema = $1 AND tc.table_name = $2
                    "#,
                )
                .bind(&self.schema)
                .bind(table_name)
                .fetch_all(&self.pool),
            )
            .await?;

        let columns = column_rows
            .into_iter()
            .map(|(name, data_type, nullable)| ColumnInfo {
                primary_key: primary_keys.contains(&name),
                not_null: nullable.eq_ignore_ascii_case("NO"),
                name,
                data_type,
            })
            .collect();

        let foreign_keys = fk_rows
            .into_iter()
            .map(|(column, references_table, references_column)| ForeignKey {
                column,
                references_table,
                references_column,
            })
            .collect();

        Ok(TableSchema {
            columns,
            primary_keys,
            foreign_keys,
        })
    }
}

fn decode_cell(row: &PgRow, idx: usize) -> serde_json::Value {
    use serde_json::Value;

    let type_name = row.columns()[idx].type_info().name().to_string();
    let decoded: std::result::Result<Option<Value>, sqlx::Error> = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::from)),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .map(|v| v.map(|n| Value::from(i64::from(n)))),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .map(|v| v.map(|n| Value::from(i64::from(n)))),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::from)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| v.map(|n| Value::from(f64::from(n)))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(|v| v.map(Value::from)),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(idx)
            .map(|v| v.map(numeric_to_json)),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| v.map(|d| Value::from(d.to_string()))),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| v.map(|d| Value::from(d.to_string()))),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| v.map(|d| Value::from(d.to_rfc3339()))),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .map(|v| v.map(|u| Value::from(u.to_string()))),
        _ => row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::from)),
    };

    match decoded {
        Ok(Some(value)) => value,
        Ok(None) => Value::Null,
        Err(_) => Value::String(format!("<{}>", type_name)),
    }
}

#[async_trait]
impl SqlBackend for PostgresBackend {
    fn name(&self) -> &str {
        &self.label
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn describe_schema(&self) -> Result<SchemaDescription> {
        let table_names: Vec<String> = self
            .bounded(
                sqlx::query_scalar(
                    r#"
                    SELECT table_name::text
                    FROM information_schema.tables
                    WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                    ORDER BY table_name
                    "#,
                )
                .bind(&self.schema)
                .fetch_all(&self.pool),
            )
            .await?;

        let mut tables = BTreeMap::new();
        let mut samples = BTreeMap::new();

        for table_name in table_names {
            let table = self.load_table(&table_name).await?;

            let sample_sql = format!(
                "SELECT * FROM {}.{} LIMIT {}",
                Dialect::Postgres.quote_ident(&self.schema),
                Dialect::Postgres.quote_ident(&table_name),
                SAMPLE_ROWS
            );
            match self.run_query(&sample_sql).await {
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

        let schema = SchemaDescription::from_tables(tables, &samples);
        info!(
            "Schema loaded for {}: {} tables, {} characters",
            self.label,
            schema.tables.len(),
            schema.text.len()
        );
        Ok(schema)
    }

    async fn execute(&self, sql: &str) -> ExecutionOutcome {
        match self.run_query(sql).await {
            Ok(rs) => ExecutionOutcome::Success(rs),
            Err(Nl2SqlError::Postgres(sqlx::Error::Database(db_error))) => {
                warn!("PostgreSQL query failed: {}", db_error);
                ExecutionOutcome::error(db_error.message().to_string())
            }
            Err(e) => {
                warn!("PostgreSQL query failed: {}", e);
                ExecutionOutcome::error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_path_statement() {
        assert_eq!(search_path_sql("chinook"), r#"SET search_path TO "chinook""#);
        assert_eq!(search_path_sql(r#"odd"name"#), r#"SET search_path TO "odd""name""#);
    }

    #[test]
    fn test_numeric_cells_are_numbers() {
        assert_eq!(numeric_to_json(Decimal::new(198, 2)), json!(1.98));
        assert_eq!(numeric_to_json(Decimal::new(5900, 2)), json!(59));
        assert_eq!(numeric_to_json(Decimal::new(-2, 0)), json!(-2));
        assert_eq!(numeric_to_json(Decimal::MAX), json!(Decimal::MAX.to_f64().unwrap()));
    }
}
