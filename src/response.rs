//! Boundary response: what callers of the engine get back as JSON or CSV

use crate::backend::{cell_to_string, ResultSet};
use crate::entities::Correction;
use crate::error::Result;
use crate::execution_loop::{IterationRecord, OrchestrationResult};
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: u32,
    pub history: Vec<IterationRecord>,
    pub corrections: Vec<Correction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl From<OrchestrationResult> for QueryResponse {
    fn from(outcome: OrchestrationResult) -> Self {
        let (result, error) = if outcome.success {
            (outcome.result, None)
        } else {
            (None, outcome.error)
        };
        Self {
            success: outcome.success,
            sql: outcome.final_sql,
            result,
            error,
            iterations: outcome.iteration_count,
            history: outcome.history,
            corrections: outcome.corrections_applied,
            warnings: outcome.warnings,
        }
    }
}

impl QueryResponse {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Header row plus one record per row; NULL cells are written as "NULL"
pub fn write_csv<W: Write>(result: &ResultSet, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(&result.columns)
        .map_err(std::io::Error::from)?;
    for row in &result.rows {
        writer
            .write_record(row.iter().map(cell_to_string))
            .map_err(std::io::Error::from)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_loop::FailureReason;
    use crate::intent::Intent;
    use serde_json::json;
    use uuid::Uuid;

    fn outcome(success: bool) -> OrchestrationResult {
        OrchestrationResult {
            query_id: Uuid::new_v4(),
            success,
            final_sql: Some("SELECT COUNT(*) FROM Customer;".to_string()),
            result: Some(ResultSet {
                columns: vec!["COUNT(*)".to_string()],
                rows: vec![vec![json!(59)]],
            }),
            error: Some("no such table: Custmer".to_string()),
            iteration_count: 1,
            history: vec![IterationRecord {
                index: 1,
                sql_attempted: "SELECT COUNT(*) FROM Customer;".to_string(),
                ..Default::default()
            }],
            corrections_applied: vec![],
            warnings: vec![],
            failure: if success {
                None
            } else {
                Some(FailureReason::NoProgress {
                    detail: "refiner returned the failed SQL unchanged".to_string(),
                })
            },
            intent: Intent::default(),
        }
    }

    #[test]
    fn test_success_shape() {
        let value = serde_json::to_value(QueryResponse::from(outcome(true))).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["result"]["columns"], json!(["COUNT(*)"]));
        assert_eq!(value["result"]["rows"], json!([[59]]));
        assert_eq!(value["iterations"], 1);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failure_shape() {
        let value = serde_json::to_value(QueryResponse::from(outcome(false))).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "no such table: Custmer");
        assert!(value.get("result").is_none());
        assert_eq!(value["history"][0]["sql_attempted"], "SELECT COUNT(*) FROM Customer;");
    }

    #[test]
    fn test_csv_output() {
        let result = ResultSet {
            columns: vec!["FirstName".to_string(), "Company".to_string()],
            rows: vec![
                vec![json!("Helena"), serde_json::Value::Null],
                vec![json!("Bjorn"), json!("Acme, Inc.")],
            ],
        };
        let mut out = Vec::new();
        write_csv(&result, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "FirstName,Company\nHelena,NULL\nBjorn,\"Acme, Inc.\"\n"
        );
    }
}
