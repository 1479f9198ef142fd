//! Orchestrator
//!
//! Drives one natural-language question through classification, extraction,
//! autocorrection and generation, then the bounded
//! validate -> execute -> classify -> refine loop. `process` never fails: every
//! outcome, including budget exhaustion and lack of progress, is a typed result
//! carrying the full iteration history.

use crate::ambiguity::{should_attempt, AmbiguityResolver};
use crate::autocorrect::Autocorrector;
use crate::backend::{ExecutionOutcome, ResultSet};
use crate::config::DEFAULT_MAX_ITERATIONS;
use crate::entities::{Correction, EntityExtractor, EntitySet};
use crate::execution_loop::error_classifier::{ErrorClassifier, ErrorKind};
use crate::execution_loop::refiner::Refiner;
use crate::generator::{Candidate, SqlCandidateGenerator};
use crate::intent::{Intent, QueryIntentClassifier};
use crate::llm::CompletionOracle;
use crate::session::Session;
use crate::validator::{ValidationReport, Validator};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Execution outcome as kept in the history (row data is only kept for the final result)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionSummary {
    Success { row_count: usize },
    Error { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub index: u32,
    pub sql_attempted: String,
    pub validation_result: Option<ValidationReport>,
    pub execution_outcome: Option<ExecutionSummary>,
    pub error_kind: Option<ErrorKind>,
    pub refinement_output: Option<String>,
    pub ambiguity_attempted: bool,
    pub ambiguity_output: Option<String>,
    pub note: Option<String>,
}

/// Why a query ended without a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    BudgetExhausted { max_iterations: u32 },
    NoProgress { detail: String },
    SchemaUnavailable { message: String },
}

impl FailureReason {
    pub fn describe(&self) -> String {
        match self {
            FailureReason::BudgetExhausted { max_iterations } => {
                format!("iteration budget of {} exhausted", max_iterations)
            }
            FailureReason::NoProgress { detail } => format!("no progress: {}", detail),
            FailureReason::SchemaUnavailable { message } => {
                format!("schema unavailable: {}", message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub query_id: Uuid,
    pub success: bool,
    pub final_sql: Option<String>,
    pub result: Option<ResultSet>,
    pub error: Option<String>,
    pub iteration_count: u32,
    pub history: Vec<IterationRecord>,
    pub corrections_applied: Vec<Correction>,
    pub warnings: Vec<String>,
    pub failure: Option<FailureReason>,
    pub intent: Intent,
}

/// Per-query state threaded through the loop
struct Run {
    query_id: Uuid,
    intent: Intent,
    entities: EntitySet,
    history: Vec<IterationRecord>,
    tried: HashSet<String>,
    last_sql: Option<String>,
    last_error: Option<String>,
    ambiguity_attempted: bool,
    /// Zero-row success kept while its ambiguity alternate is re-executed
    fallback: Option<(String, ResultSet)>,
}

impl Run {
    fn iteration_count(&self) -> u32 {
        self.history.len() as u32
    }

    fn succeed(self, sql: String, result: ResultSet) -> OrchestrationResult {
        info!(
            "[{}] Succeeded after {} iteration(s) with {} row(s)",
            self.query_id,
            self.iteration_count(),
            result.rows.len()
        );
        OrchestrationResult {
            query_id: self.query_id,
            success: true,
            final_sql: Some(sql),
            result: Some(result),
            error: None,
            iteration_count: self.iteration_count(),
            history: self.history,
            corrections_applied: self.entities.corrections,
            warnings: self.entities.warnings,
            failure: None,
            intent: self.intent,
        }
    }

    /// The alternate got its one re-execution; report the earlier zero-row success
    fn keep_fallback(
        mut self,
        mut record: IterationRecord,
        sql: String,
        result: ResultSet,
    ) -> OrchestrationResult {
        warn!("[{}] Alternate query failed, keeping the earlier result", self.query_id);
        record.note = Some("alternate query failed; keeping the earlier result".to_string());
        self.history.push(record);
        self.succeed(sql, result)
    }

    fn fail(self, reason: FailureReason) -> OrchestrationResult {
        error!("[{}] Failed: {}", self.query_id, reason.describe());
        let error = self.last_error.clone().unwrap_or_else(|| reason.describe());
        OrchestrationResult {
            query_id: self.query_id,
            success: false,
            final_sql: self.last_sql.clone(),
            result: None,
            error: Some(error),
            iteration_count: self.iteration_count(),
            history: self.history,
            corrections_applied: self.entities.corrections,
            warnings: self.entities.warnings,
            failure: Some(reason),
            intent: self.intent,
        }
    }
}

pub struct Orchestrator {
    session: Arc<Session>,
    intent_classifier: QueryIntentClassifier,
    extractor: EntityExtractor,
    autocorrector: Autocorrector,
    generator: SqlCandidateGenerator,
    validator: Validator,
    error_classifier: ErrorClassifier,
    refiner: Refiner,
    ambiguity: AmbiguityResolver,
    max_iterations: u32,
}

impl Orchestrator {
    pub fn new(session: Arc<Session>, oracle: Arc<dyn CompletionOracle>) -> Self {
        Self {
            session,
            intent_classifier: QueryIntentClassifier::new(),
            extractor: EntityExtractor::new(),
            autocorrector: Autocorrector::new(),
            generator: SqlCandidateGenerator::new(Arc::clone(&oracle)),
            validator: Validator::new(),
            error_classifier: ErrorClassifier::new(),
            refiner: Refiner::new(Arc::clone(&oracle)),
            ambiguity: AmbiguityResolver::new(oracle),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// At least one iteration is always allowed
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub async fn process(&self, nl_query: &str) -> OrchestrationResult {
        let query_id = Uuid::new_v4();
        info!("[{}] Processing query: {}", query_id, nl_query);

        let intent = self.intent_classifier.classify(nl_query);
        let mut entities = self.extractor.extract(nl_query);
        info!(
            "[{}] Intent {} on {}, names {:?}",
            query_id, intent.intent_type, intent.target_entity, entities.person_names
        );

        let mut run = Run {
            query_id,
            intent,
            entities: EntitySet::default(),
            history: Vec::new(),
            tried: HashSet::new(),
            last_sql: None,
            last_error: None,
            ambiguity_attempted: false,
            fallback: None,
        };

        let schema = match self.session.schema().await {
            Ok(schema) => schema,
            Err(e) => {
                run.entities = entities;
                return run.fail(FailureReason::SchemaUnavailable {
                    message: e.to_string(),
                });
            }
        };

        match self.session.knowledge_base().await {
            Ok(kb) => self
                .autocorrector
                .correct(&kb, nl_query, &run.intent, &mut entities),
            Err(e) => warn!("[{}] Knowledge base unavailable, skipping autocorrect: {}", query_id, e),
        }
        run.entities = entities;

        let dialect = self.session.dialect();
        let backend = self.session.backend();

        let mut current = self
            .generator
            .generate(nl_query, &run.intent, &run.entities, &schema.text, dialect)
            .await;

        loop {
            if run.iteration_count() >= self.max_iterations {
                return run.fail(FailureReason::BudgetExhausted {
                    max_iterations: self.max_iterations,
                });
            }

            let mut record = IterationRecord {
                index: run.iteration_count() + 1,
                ..Default::default()
            };
            info!("[{}] Iteration {}/{}", query_id, record.index, self.max_iterations);

            let sql = match current {
                Candidate::Sql(ref sql) if !sql.trim().is_empty() => sql.clone(),
                Candidate::Sql(_) => {
                    record.note = Some("empty SQL candidate".to_string());
                    run.history.push(record);
                    return run.fail(FailureReason::NoProgress {
                        detail: "empty SQL candidate".to_string(),
                    });
                }
                Candidate::Sentinel(ref reason) => {
                    record.note = Some(format!("no SQL candidate: {}", reason));
                    run.history.push(record);
                    run.last_error = Some(format!("SQL generation failed: {}", reason));
                    return run.fail(FailureReason::NoProgress {
                        detail: format!("no SQL candidate: {}", reason),
                    });
                }
            };
            record.sql_attempted = sql.clone();

            if !run.tried.insert(sql.clone()) {
                record.note = Some("SQL already tried".to_string());
                run.history.push(record);
                return run.fail(FailureReason::NoProgress {
                    detail: "SQL repeated an earlier attempt".to_string(),
                });
            }
            run.last_sql = Some(sql.clone());

            let report = self.validator.validate(&sql);
            let valid = report.is_valid;
            record.validation_result = Some(report);
            if !valid {
                if let Some((earlier_sql, earlier_result)) = run.fallback.take() {
                    return run.keep_fallback(record, earlier_sql, earlier_result);
                }
                let rewritten = self.validator.local_rewrite(&sql);
                if rewritten.is_empty() || rewritten == sql || run.tried.contains(&rewritten) {
                    record.note = Some("validation failed and local rewrite made no change".to_string());
                    run.history.push(record);
                    run.last_error = Some("SQL failed validation".to_string());
                    return run.fail(FailureReason::NoProgress {
                        detail: "local rewrite could not repair the SQL".to_string(),
                    });
                }
                record.note = Some(format!("validation failed, rewritten locally to: {}", rewritten));
                run.history.push(record);
                current = Candidate::Sql(rewritten);
                continue;
            }

            match backend.execute(&sql).await {
                ExecutionOutcome::Success(result) => {
                    record.execution_outcome = Some(ExecutionSummary::Success {
                        row_count: result.rows.len(),
                    });
                    run.last_error = None;

                    let budget_left = record.index < self.max_iterations;
                    if budget_left
                        && should_attempt(run.ambiguity_attempted, &run.intent, &run.entities, &result, &sql)
                    {
                        run.ambiguity_attempted = true;
                        record.ambiguity_attempted = true;
                        let alternate = self
                            .ambiguity
                            .resolve(nl_query, &run.entities, &schema.text, dialect, &sql)
                            .await
                            .filter(|alt| !alt.trim().is_empty() && !run.tried.contains(alt));

                        if let Some(alternate) = alternate {
                            record.ambiguity_output = Some(alternate.clone());
                            run.history.push(record);
                            run.fallback = Some((sql, result));
                            current = Candidate::Sql(alternate);
                            continue;
                        }
                        record.note = Some("no alternate query; keeping the empty result".to_string());
                    }

                    run.history.push(record);
                    return run.succeed(sql, result);
                }
                ExecutionOutcome::Error { message } => {
                    warn!("[{}] Execution failed: {}", query_id, message);
                    let analysis = self.error_classifier.classify(&message);
                    record.execution_outcome = Some(ExecutionSummary::Error {
                        message: message.clone(),
                    });
                    record.error_kind = Some(analysis.error_type);
                    if let Some((earlier_sql, earlier_result)) = run.fallback.take() {
                        return run.keep_fallback(record, earlier_sql, earlier_result);
                    }
                    run.last_error = Some(message);

                    let refined = self
                        .refiner
                        .refine(&sql, &analysis, &run.intent, &run.entities, &schema.text, dialect)
                        .await;
                    record.refinement_output = Some(refined.clone());

                    if run.tried.contains(&refined) {
                        record.note = Some("refinement returned an already tried SQL".to_string());
                        run.history.push(record);
                        return run.fail(FailureReason::NoProgress {
                            detail: "refiner returned the failed SQL unchanged".to_string(),
                        });
                    }
                    run.history.push(record);
                    current = Candidate::Sql(refined);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::knowledge_base::KnowledgeStore;
    use crate::llm::{CompletionOptions, OracleError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted(Mutex<VecDeque<String>>);

    #[async_trait]
    impl CompletionOracle for Scripted {
        async fn complete(&self, _prompt: &str, _options: CompletionOptions) -> Result<String, OracleError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| OracleError::Transport("connection refused".to_string()))
        }
    }

    fn orchestrator(dir: &std::path::Path, replies: &[&str]) -> Orchestrator {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch(
                "CREATE TABLE Customer (CustomerId INTEGER PRIMARY KEY, FirstName NVARCHAR(40), LastName NVARCHAR(20));
                 INSERT INTO Customer VALUES (1, 'Helena', 'Holy'), (2, 'Bjorn', 'Hansen');",
            )
            .unwrap();
        let session = Arc::new(Session::new(Arc::new(backend), KnowledgeStore::new(dir)));
        let oracle = Scripted(Mutex::new(replies.iter().map(|r| r.to_string()).collect()));
        Orchestrator::new(session, Arc::new(oracle))
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(
            dir.path(),
            &[
                "SELECT * FROM Custmer;",
                "SELECT * FROM Custmr;",
                "SELECT * FROM Cstmr;",
                "SELECT * FROM Cstm;",
            ],
        );
        let result = orchestrator.process("Show every customer").await;

        assert!(!result.success);
        assert_eq!(result.iteration_count, 3);
        assert_eq!(result.history.len(), 3);
        assert_eq!(
            result.failure,
            Some(FailureReason::BudgetExhausted { max_iterations: 3 })
        );
        assert_eq!(result.final_sql.as_deref(), Some("SELECT * FROM Cstmr;"));
        assert_eq!(result.error.as_deref(), Some("no such table: Cstmr"));
        assert!(result
            .history
            .iter()
            .all(|r| r.error_kind == Some(ErrorKind::MissingTable)));
    }

    #[tokio::test]
    async fn test_local_rewrite_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(
            dir.path(),
            &["Here you go: SELECT FirstName FROM Customer WHERE CustomerId = 1"],
        );
        let result = orchestrator.process("Show the first customer").await;

        assert!(result.success, "{:?}", result);
        assert_eq!(result.iteration_count, 2);
        assert!(!result.history[0].validation_result.as_ref().unwrap().is_valid);
        assert_eq!(
            result.final_sql.as_deref(),
            Some("SELECT FirstName FROM Customer WHERE CustomerId = 1;")
        );
    }

    #[tokio::test]
    async fn test_refined_sql_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(
            dir.path(),
            &[
                "SELECT FristName FROM Customer;",
                "SELECT FirstName FROM Customer ORDER BY CustomerId;",
            ],
        );
        let result = orchestrator.process("List customer first names").await;

        assert!(result.success);
        assert_eq!(result.iteration_count, 2);
        assert_eq!(result.history[0].error_kind, Some(ErrorKind::MissingColumn));
        assert_eq!(result.result.unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn test_max_iterations_floor() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), &[]).with_max_iterations(0);
        assert_eq!(orchestrator.max_iterations(), 1);
    }
}
