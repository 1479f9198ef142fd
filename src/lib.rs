//! Iterative natural-language to SQL refinement engine
//!
//! A question is classified, its literal values are autocorrected against a
//! knowledge base sampled from the database, and the generated SQL is executed
//! and repaired in a bounded loop until it runs or the loop stops making progress.

pub mod ambiguity;
pub mod autocorrect;
pub mod backend;
pub mod config;
pub mod entities;
pub mod error;
pub mod execution_loop;
pub mod generator;
pub mod intent;
pub mod knowledge_base;
pub mod llm;
pub mod response;
pub mod schema;
pub mod session;
pub mod validator;

pub use backend::{Dialect, ExecutionOutcome, ResultSet, SqlBackend};
pub use config::EngineConfig;
pub use error::{Nl2SqlError, Result};
pub use execution_loop::{OrchestrationResult, Orchestrator};
pub use knowledge_base::KnowledgeBase;
pub use llm::{CompletionOptions, CompletionOracle, LlmClient, OracleError};
pub use response::QueryResponse;
pub use session::Session;
