//! Refinement loop: error classification, SQL repair and the orchestrating state machine

pub mod error_classifier;
pub mod orchestrator;
pub mod refiner;

pub use error_classifier::{ErrorAnalysis, ErrorClassifier, ErrorKind};
pub use orchestrator::{
    ExecutionSummary, FailureReason, IterationRecord, OrchestrationResult, Orchestrator,
};
pub use refiner::Refiner;
