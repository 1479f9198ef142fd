//! SQL Candidate Generator
//!
//! Catalog questions are answered from a fixed template without touching the
//! oracle. Everything else is one oracle call whose reply is cleaned down to a
//! single statement.

use crate::backend::Dialect;
use crate::entities::EntitySet;
use crate::intent::{Intent, IntentType};
use crate::llm::{CompletionOptions, CompletionOracle, OracleError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const GENERATION_TEMPERATURE: f32 = 0.1;
pub const GENERATION_MAX_TOKENS: u32 = 300;
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(35);

// longest label first so "SQLQuery:" is not left as "SQL "
const RESPONSE_NOISE: &[&str] = &["```sql", "```", "SQLQuery:", "SQL:", "Query:"];

/// Output of generation. A sentinel carries the reason no SQL could be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Sql(String),
    Sentinel(String),
}

pub fn generation_options() -> CompletionOptions {
    CompletionOptions::new(GENERATION_TEMPERATURE, GENERATION_MAX_TOKENS, GENERATION_TIMEOUT)
}

/// Strip fences and labels, then normalize to exactly one trailing semicolon.
/// Returns an empty string when nothing is left.
pub fn clean_sql_response(response: &str) -> String {
    let mut text = response.to_string();
    for noise in RESPONSE_NOISE {
        text = text.replace(noise, "");
    }
    let trimmed = text.trim().trim_end_matches(';').trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{};", trimmed)
    }
}

/// One oracle call, cleaned. Empty replies count as failures.
pub async fn complete_sql(
    oracle: &dyn CompletionOracle,
    prompt: &str,
    options: CompletionOptions,
) -> Result<String, OracleError> {
    let raw = oracle.complete(prompt, options).await?;
    let sql = clean_sql_response(&raw);
    if sql.is_empty() {
        return Err(OracleError::Malformed("empty completion".to_string()));
    }
    Ok(sql)
}

/// Template SQL for catalog questions
pub fn fast_path(query: &str, intent: &Intent, dialect: Dialect) -> Option<String> {
    if intent.intent_type != IntentType::MetaQuery {
        return None;
    }
    let lower = query.to_lowercase();
    if lower.contains("db name") || lower.contains("database name") {
        Some(dialect.catalog_overview_sql().to_string())
    } else if lower.contains("tables") {
        Some(dialect.list_tables_sql().to_string())
    } else {
        None
    }
}

pub struct SqlCandidateGenerator {
    oracle: Arc<dyn CompletionOracle>,
}

impl SqlCandidateGenerator {
    pub fn new(oracle: Arc<dyn CompletionOracle>) -> Self {
        Self { oracle }
    }

    pub async fn generate(
        &self,
        query: &str,
        intent: &Intent,
        entities: &EntitySet,
        schema_text: &str,
        dialect: Dialect,
    ) -> Candidate {
        if let Some(sql) = fast_path(query, intent, dialect) {
            info!("Catalog question answered from template");
            return Candidate::Sql(sql);
        }

        if !entities.corrections.is_empty() {
            info!(
                "Generating with corrected entities: {}",
                entities
                    .corrections
                    .iter()
                    .map(|c| c.describe())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let prompt = build_generation_prompt(query, intent, entities, schema_text, dialect);
        debug!("Generation prompt ({} chars)", prompt.len());

        match complete_sql(self.oracle.as_ref(), &prompt, generation_options()).await {
            Ok(sql) => {
                info!("Generated SQL: {}", sql);
                Candidate::Sql(sql)
            }
            Err(e) => {
                warn!("SQL generation failed: {}", e);
                Candidate::Sentinel(e.to_string())
            }
        }
    }
}

fn build_generation_prompt(
    query: &str,
    intent: &Intent,
    entities: &EntitySet,
    schema_text: &str,
    dialect: Dialect,
) -> String {
    let intent_json = serde_json::to_string_pretty(intent).unwrap_or_default();
    let entities_json = entities.prompt_json();

    format!(
        r#"You are an expert {dialect} query writer.
Given the natural language query, the user's intent, the extracted entities and the database schema, generate an accurate and efficient {dialect} query.

Natural Language Query: {query}
User Intent Analysis: {intent_json}
Extracted Entities (may include autocorrected names): {entities_json}

Database Schema ({dialect}):
{schema_text}

Key Instructions:
1. Identify the tables the question needs.
2. Specify JOIN conditions accurately and use table aliases.
3. Apply WHERE clauses correctly.
4. Use aggregations (COUNT, SUM, ...) with GROUP BY where needed, ORDER BY and LIMIT for rankings.
5. Match the schema's case for table and column names.
6. Use the exact entity names provided in "Extracted Entities"; they have been verified against the database.
7. Return ONLY the SQL query, ending with a semicolon.

Example (artists and album counts):
NL: Show me all artists and how many albums each has.
SQLQuery: SELECT ar.Name, COUNT(al.AlbumId) AS TotalAlbums FROM Artist ar JOIN Album al ON ar.ArtistId = al.ArtistId GROUP BY ar.ArtistId, ar.Name ORDER BY TotalAlbums DESC;

Now, generate the SQL query for the provided Natural Language Query.
SQLQuery:"#
    )
}
