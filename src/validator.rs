//! Validator
//!
//! A cheap plausibility gate in front of execution: the statement has to start
//! with SELECT. Passing does not mean the SQL will run. The sqlparser pass only
//! exposes the string literals of the WHERE clause for the ambiguity check.

use crate::generator::clean_sql_response;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr, Query, SetExpr, Statement, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

lazy_static! {
    static ref SELECT_KEYWORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub syntax_errors: Vec<String>,
    pub suggestions: Vec<String>,
    /// String literals compared in WHERE clauses; `None` when the SQL did not parse
    #[serde(skip_serializing_if = "Option::is_none")]
    pub where_literals: Option<Vec<String>>,
}

pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, sql: &str) -> ValidationReport {
        let trimmed = sql.trim();
        let mut report = ValidationReport {
            is_valid: true,
            ..Default::default()
        };

        if !trimmed.ends_with(';') {
            report.suggestions.push("Add semicolon at end of SQL.".to_string());
        }
        if !trimmed.to_uppercase().starts_with("SELECT") {
            report.is_valid = false;
            report
                .syntax_errors
                .push("Query does not start with SELECT.".to_string());
        }
        report.where_literals = where_string_literals(trimmed);

        debug!("Validation of '{}': {:?}", trimmed, report);
        report
    }

    /// Rule-based repair without the oracle: drop fences and labels, cut any
    /// preamble before the first SELECT, end with one semicolon.
    pub fn local_rewrite(&self, sql: &str) -> String {
        let cleaned = clean_sql_response(sql);
        let rewritten = match SELECT_KEYWORD.find(&cleaned) {
            Some(m) if m.start() > 0 => clean_sql_response(&cleaned[m.start()..]),
            _ => cleaned,
        };
        warn!("Local rewrite: '{}' -> '{}'", sql.trim(), rewritten);
        rewritten
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// String literals in the WHERE clauses of every SELECT in `sql`, in source order
pub fn where_string_literals(sql: &str) -> Option<Vec<String>> {
    let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => statements,
        Err(e) => {
            debug!("SQL did not parse, no literal view: {}", e);
            return None;
        }
    };

    let mut literals = Vec::new();
    for statement in &statements {
        if let Statement::Query(query) = statement {
            collect_query(query, &mut literals);
        }
    }
    Some(literals)
}

fn collect_query(query: &Query, out: &mut Vec<String>) {
    collect_set_expr(&query.body, out);
}

fn collect_set_expr(body: &SetExpr, out: &mut Vec<String>) {
    match body {
        SetExpr::Select(select) => {
            if let Some(selection) = &select.selection {
                collect_expr(selection, out);
            }
        }
        SetExpr::Query(query) => collect_query(query, out),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr(left, out);
            collect_set_expr(right, out);
        }
        _ => {}
    }
}

fn collect_expr(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Value(value) => {
            if let Some(text) = string_value(value) {
                out.push(text);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_expr(left, out);
            collect_expr(right, out);
        }
        Expr::Nested(inner) | Expr::UnaryOp { expr: inner, .. } => collect_expr(inner, out),
        Expr::InList { expr, list, .. } => {
            collect_expr(expr, out);
            for item in list {
                collect_expr(item, out);
            }
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            collect_expr(expr, out);
            collect_expr(pattern, out);
        }
        Expr::Between { expr, low, high, .. } => {
            collect_expr(expr, out);
            collect_expr(low, out);
            collect_expr(high, out);
        }
        Expr::InSubquery { subquery, .. } => collect_query(subquery, out),
        Expr::Subquery(subquery) | Expr::Exists { subquery, .. } => collect_query(subquery, out),
        _ => {}
    }
}

fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::SingleQuotedString(s)
        | Value::NationalStringLiteral(s)
        | Value::EscapedStringLiteral(s) => Some(s.clone()),
        _ => None,
    }
}
