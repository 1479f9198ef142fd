//! Refiner
//!
//! Builds a repair prompt from a failed statement and its classified error and
//! asks the oracle for a corrected statement. On any failure the failed SQL is
//! handed back unchanged, which the orchestrator reads as "no progress".

use crate::backend::Dialect;
use crate::entities::EntitySet;
use crate::execution_loop::error_classifier::{ErrorAnalysis, ErrorKind};
use crate::generator::complete_sql;
use crate::intent::Intent;
use crate::llm::{CompletionOptions, CompletionOracle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const REFINEMENT_TEMPERATURE: f32 = 0.2;
pub const REFINEMENT_MAX_TOKENS: u32 = 300;
pub const REFINEMENT_TIMEOUT: Duration = Duration::from_secs(40);

pub fn refinement_options() -> CompletionOptions {
    CompletionOptions::new(REFINEMENT_TEMPERATURE, REFINEMENT_MAX_TOKENS, REFINEMENT_TIMEOUT)
}

/// Kind-specific guidance appended to the repair prompt
pub fn repair_hint(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::MissingColumn => {
            "A column referenced in the query does not exist. Check the schema and use only column names listed for each table, with the schema's exact spelling."
        }
        ErrorKind::MissingTable => {
            "A table referenced in the query does not exist. Use only the tables listed in the schema."
        }
        ErrorKind::SyntaxError => {
            "The query is not valid SQL. Fix keywords, commas, parentheses and quoting."
        }
        ErrorKind::AmbiguousColumn => {
            "A column reference exists in more than one joined table. Qualify it with the table alias."
        }
        ErrorKind::Unknown => "Review the query against the schema and fix any issues.",
    }
}

pub struct Refiner {
    oracle: Arc<dyn CompletionOracle>,
}

impl Refiner {
    pub fn new(oracle: Arc<dyn CompletionOracle>) -> Self {
        Self { oracle }
    }

    pub async fn refine(
        &self,
        sql: &str,
        analysis: &ErrorAnalysis,
        intent: &Intent,
        entities: &EntitySet,
        schema_text: &str,
        dialect: Dialect,
    ) -> String {
        info!("Refining SQL for error: {}", analysis.error_type);
        let prompt = build_repair_prompt(sql, analysis, intent, entities, schema_text, dialect);

        match complete_sql(self.oracle.as_ref(), &prompt, refinement_options()).await {
            Ok(refined) => {
                info!("Refined SQL: {}", refined);
                refined
            }
            Err(e) => {
                warn!("Refinement failed, keeping the failed SQL: {}", e);
                sql.to_string()
            }
        }
    }
}

fn build_repair_prompt(
    sql: &str,
    analysis: &ErrorAnalysis,
    intent: &Intent,
    entities: &EntitySet,
    schema_text: &str,
    dialect: Dialect,
) -> String {
    let analysis_json = serde_json::json!({
        "error_type": analysis.error_type,
        "original_error_message": analysis.original_error_message,
        "hint": repair_hint(analysis.error_type),
    });
    let analysis_json = serde_json::to_string_pretty(&analysis_json).unwrap_or_default();
    let intent_json = serde_json::to_string_pretty(intent).unwrap_or_default();
    let entities_json = entities.prompt_json();

    let parts = vec![
        "The following SQL query failed:".to_string(),
        "--- FAILED SQL ---".to_string(),
        sql.to_string(),
        "---".to_string(),
        String::new(),
        format!("Error Analysis:\n{}", analysis_json),
        String::new(),
        format!("Original User Query Intent:\n{}", intent_json),
        String::new(),
        format!("Extracted Entities from User Query:\n{}", entities_json),
        String::new(),
        format!("Database Schema ({}):\n{}", dialect, schema_text),
        String::new(),
        "INSTRUCTIONS:".to_string(),
        "1. Analyze the failed SQL, error analysis, intent, entities and schema.".to_string(),
        format!(
            "2. Produce a CORRECTED {} query that resolves the error AND fulfills the user's intent.",
            dialect
        ),
        "3. Pay attention to table/column names, aliases, JOINs, aggregates and syntax.".to_string(),
        "4. Return ONLY the corrected SQL query, ending with a semicolon. No explanations.".to_string(),
        "Corrected SQLQuery:".to_string(),
    ];
    parts.join("\n")
}
