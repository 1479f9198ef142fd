//! Error Classifier
//!
//! Maps backend error text onto a small taxonomy that drives the refiner's hints.
//! Rules are ordered substring checks on the lowercased message; first match wins.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingColumn,
    MissingTable,
    SyntaxError,
    AmbiguousColumn,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingColumn => "missing_column",
            ErrorKind::MissingTable => "missing_table",
            ErrorKind::SyntaxError => "syntax_error",
            ErrorKind::AmbiguousColumn => "ambiguous_column",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified execution error, as embedded in the repair prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub error_type: ErrorKind,
    pub original_error_message: String,
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Never fails; unrecognized messages are `Unknown`
    pub fn classify(&self, message: &str) -> ErrorAnalysis {
        let msg = message.to_lowercase();

        let error_type = if msg.contains("no such column")
            || (msg.contains("column") && msg.contains("does not exist"))
        {
            ErrorKind::MissingColumn
        } else if msg.contains("no such table")
            || ((msg.contains("relation") || msg.contains("table")) && msg.contains("does not exist"))
        {
            ErrorKind::MissingTable
        } else if msg.contains("syntax error") {
            ErrorKind::SyntaxError
        } else if msg.contains("ambiguous column") || msg.contains("is ambiguous") {
            ErrorKind::AmbiguousColumn
        } else {
            ErrorKind::Unknown
        };

        ErrorAnalysis {
            error_type,
            original_error_message: message.to_string(),
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(message: &str) -> ErrorKind {
        ErrorClassifier::new().classify(message).error_type
    }

    #[test]
    fn test_sqlite_messages() {
        assert_eq!(kind("no such column: c.FristName"), ErrorKind::MissingColumn);
        assert_eq!(kind("no such table: Custmer"), ErrorKind::MissingTable);
        assert_eq!(kind("near \"FORM\": syntax error"), ErrorKind::SyntaxError);
        assert_eq!(kind("ambiguous column name: CustomerId"), ErrorKind::AmbiguousColumn);
    }

    #[test]
    fn test_postgres_messages() {
        assert_eq!(kind("column \"fristname\" does not exist"), ErrorKind::MissingColumn);
        assert_eq!(kind("relation \"custmer\" does not exist"), ErrorKind::MissingTable);
        assert_eq!(kind("syntax error at or near \"FORM\""), ErrorKind::SyntaxError);
        assert_eq!(kind("column reference \"customerid\" is ambiguous"), ErrorKind::AmbiguousColumn);
    }

    #[test]
    fn test_first_rule_wins() {
        // mentions both a column and a table; the column rule is checked first
        assert_eq!(
            kind("column \"x\" of table \"t\" does not exist"),
            ErrorKind::MissingColumn
        );
    }

    #[test]
    fn test_unknown_keeps_message() {
        let analysis = ErrorClassifier::new().classify("database is locked");
        assert_eq!(analysis.error_type, ErrorKind::Unknown);
        assert_eq!(analysis.original_error_message, "database is locked");
    }
}
