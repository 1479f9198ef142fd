//! Ambiguity Resolver
//!
//! A question naming several people ("customers Helena and Bjorn") is often
//! turned into one conjunctive filter that matches nobody. When that happens the
//! resolver asks the oracle once for an OR-across-names rewrite.

use crate::backend::{Dialect, ResultSet};
use crate::entities::EntitySet;
use crate::generator::complete_sql;
use crate::intent::{Intent, TargetEntity};
use crate::llm::{CompletionOptions, CompletionOracle};
use crate::validator::where_string_literals;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const AMBIGUITY_TEMPERATURE: f32 = 0.1;
pub const AMBIGUITY_MAX_TOKENS: u32 = 300;
pub const AMBIGUITY_TIMEOUT: Duration = Duration::from_secs(35);

pub fn ambiguity_options() -> CompletionOptions {
    CompletionOptions::new(AMBIGUITY_TEMPERATURE, AMBIGUITY_MAX_TOKENS, AMBIGUITY_TIMEOUT)
}

/// True when an extracted name is part of the executed filter: as a compared
/// string literal when the SQL parses, else anywhere in the text.
pub fn names_in_sql(names: &[String], sql: &str) -> bool {
    let names: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
    match where_string_literals(sql) {
        Some(literals) => literals.iter().any(|literal| {
            let literal = literal.to_lowercase();
            names.iter().any(|name| literal.contains(name.as_str()))
        }),
        None => {
            let sql = sql.to_lowercase();
            names.iter().any(|name| sql.contains(name.as_str()))
        }
    }
}

/// Preconditions for the single ambiguity attempt of a query
pub fn should_attempt(
    already_attempted: bool,
    intent: &Intent,
    entities: &EntitySet,
    result: &ResultSet,
    sql: &str,
) -> bool {
    !already_attempted
        && intent.target_entity == TargetEntity::Customer
        && entities.person_names.len() >= 2
        && result.is_empty()
        && names_in_sql(&entities.person_names, sql)
}

pub struct AmbiguityResolver {
    oracle: Arc<dyn CompletionOracle>,
}

impl AmbiguityResolver {
    pub fn new(oracle: Arc<dyn CompletionOracle>) -> Self {
        Self { oracle }
    }

    /// Alternate SQL, or `None` when the oracle failed or echoed `current_sql`
    pub async fn resolve(
        &self,
        nl_query: &str,
        entities: &EntitySet,
        schema_text: &str,
        dialect: Dialect,
        current_sql: &str,
    ) -> Option<String> {
        warn!(
            "Zero rows for multi-name customer query, names {:?}. Trying an OR-across-names query.",
            entities.person_names
        );
        let prompt = build_ambiguity_prompt(nl_query, &entities.person_names, schema_text, dialect);

        match complete_sql(self.oracle.as_ref(), &prompt, ambiguity_options()).await {
            Ok(sql) if sql != current_sql => {
                info!("Ambiguity rewrite: {}", sql);
                Some(sql)
            }
            Ok(_) => {
                info!("Ambiguity rewrite repeated the executed SQL; keeping the empty result");
                None
            }
            Err(e) => {
                warn!("Ambiguity rewrite failed: {}", e);
                None
            }
        }
    }
}

fn build_ambiguity_prompt(nl_query: &str, names: &[String], schema_text: &str, dialect: Dialect) -> String {
    let escape = |s: &str| s.replace('\'', "''");
    let first = names.first().map(|n| escape(n)).unwrap_or_default();
    let second = names
        .get(1)
        .map(|n| escape(n))
        .unwrap_or_else(|| "AnotherName".to_string());
    let names_list = format!(
        "[{}]",
        names
            .iter()
            .map(|n| format!("'{}'", escape(n)))
            .collect::<Vec<_>>()
            .join(", ")
    );

    format!(
        r#"You are an expert {dialect} query writer helping a user who provided multiple names that might refer to separate individuals.
Original User Query: "{nl_query}"
The system extracted these names (already autocorrected if needed): {names_list}
An earlier query like `SELECT ... WHERE FirstName = '{first}' AND (LastName = '{second}' OR FirstName = '{second}')` returned 0 results.
It is likely the user wants customers where EITHER the FirstName is one of the listed names, OR LastName matches one of them.

Database Schema ({dialect}):
{schema_text}

Task: Generate a {dialect} query to find customers where the FirstName is IN the list of names: {names_list}.
Select relevant customer details: FirstName, LastName, Address, City, State, Country. Use table alias 'c' for Customer.
IMPORTANT: Use the exact names provided; they have been verified against the database.
Return ONLY the SQL query, ending with a semicolon.

Example for names ['Alice', 'Bob']:
SQLQuery: SELECT c.FirstName, c.LastName, c.Address, c.City, c.State, c.Country FROM Customer c WHERE c.FirstName IN ('Alice', 'Bob');

SQLQuery:"#
    )
}
