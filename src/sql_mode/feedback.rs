//! SQL Feedback
//!
//! Classifies why a generated query failed (validation or execution) and
//! turns the classification into a corrective prompt for the next attempt.

use crate::catalog::schema::SchemaCatalog;
use crate::error::NlqError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy for generated SQL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    ParseError,
    ForbiddenStatement,
    UnknownTable,
    ColumnNotFound,
    AmbiguousColumn,
    InvalidAggregation,
    TypeMismatch,
    Timeout,
    ExecutionError(String),
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::ParseError => write!(f, "ParseError"),
            SqlErrorClass::ForbiddenStatement => write!(f, "ForbiddenStatement"),
            SqlErrorClass::UnknownTable => write!(f, "UnknownTable"),
            SqlErrorClass::ColumnNotFound => write!(f, "ColumnNotFound"),
            SqlErrorClass::AmbiguousColumn => write!(f, "AmbiguousColumn"),
            SqlErrorClass::InvalidAggregation => write!(f, "InvalidAggregation"),
            SqlErrorClass::TypeMismatch => write!(f, "TypeMismatch"),
            SqlErrorClass::Timeout => write!(f, "Timeout"),
            SqlErrorClass::ExecutionError(msg) => write!(f, "ExecutionError({})", msg),
        }
    }
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify validator output; the first recognizable error wins
    pub fn classify_validation(errors: &[String]) -> SqlErrorClass {
        for error in errors {
            let msg = error.to_lowercase();
            if msg.contains("parse") || msg.contains("empty") {
                return SqlErrorClass::ParseError;
            }
            if msg.contains("not in the schema") || msg.contains("unknown table") {
                return SqlErrorClass::UnknownTable;
            }
            if msg.contains("not allowed") || msg.contains("forbidden") || msg.contains("only a single") {
                return SqlErrorClass::ForbiddenStatement;
            }
        }
        SqlErrorClass::ForbiddenStatement
    }

    /// Classify a database error message
    pub fn classify_execution(error: &NlqError) -> SqlErrorClass {
        if error.is_timeout() {
            return SqlErrorClass::Timeout;
        }
        let msg = error.to_string().to_lowercase();

        if msg.contains("column") && msg.contains("does not exist") {
            return SqlErrorClass::ColumnNotFound;
        }
        if msg.contains("relation") && msg.contains("does not exist") {
            return SqlErrorClass::UnknownTable;
        }
        if msg.contains("ambiguous") {
            return SqlErrorClass::AmbiguousColumn;
        }
        if msg.contains("group by") || msg.contains("aggregate") {
            return SqlErrorClass::InvalidAggregation;
        }
        if msg.contains("operator does not exist") || msg.contains("invalid input syntax") || msg.contains("cannot cast") {
            return SqlErrorClass::TypeMismatch;
        }
        if msg.contains("syntax error") {
            return SqlErrorClass::ParseError;
        }
        SqlErrorClass::ExecutionError(error.to_string())
    }
}

/// What the generator is told about the previous failed attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlFeedback {
    pub attempt: u8,
    pub previous_sql: String,
    pub class: SqlErrorClass,
    pub detail: String,
}

impl SqlFeedback {
    pub fn from_validation(attempt: u8, previous_sql: &str, errors: &[String]) -> Self {
        Self {
            attempt,
            previous_sql: previous_sql.to_string(),
            class: ErrorClassifier::classify_validation(errors),
            detail: errors.join("; "),
        }
    }

    pub fn from_execution(attempt: u8, previous_sql: &str, error: &NlqError) -> Self {
        Self {
            attempt,
            previous_sql: previous_sql.to_string(),
            class: ErrorClassifier::classify_execution(error),
            detail: error.to_string(),
        }
    }

    /// Corrective instructions appended to the generation prompt
    pub fn to_prompt(&self, schema: &SchemaCatalog) -> String {
        let mut parts = vec![
            format!(
                "RETRY ATTEMPT {}: your previous query failed ({}).",
                self.attempt, self.class
            ),
            format!("Previous query:\n{}", self.previous_sql),
            format!("Error: {}", self.detail),
        ];

        match &self.class {
            SqlErrorClass::ParseError => {
                parts.push("Return one syntactically valid PostgreSQL SELECT statement.".to_string());
            }
            SqlErrorClass::ForbiddenStatement => {
                parts.push(
                    "Only a single read-only SELECT (optionally with WITH) is allowed. No DDL, DML, locks or administrative functions."
                        .to_string(),
                );
            }
            SqlErrorClass::UnknownTable => {
                let tables: Vec<String> = schema.tables.iter().map(|t| t.qualified_name()).collect();
                parts.push(format!("Use only these tables: {}", tables.join(", ")));
            }
            SqlErrorClass::ColumnNotFound => {
                parts.push("A referenced column does not exist. Check the column lists in the schema.".to_string());
            }
            SqlErrorClass::AmbiguousColumn => {
                parts.push("Qualify every column with its table alias.".to_string());
            }
            SqlErrorClass::InvalidAggregation => {
                parts.push(
                    "Every non-aggregated selected column must appear in GROUP BY.".to_string(),
                );
            }
            SqlErrorClass::TypeMismatch => {
                parts.push("Cast values to the column's type before comparing.".to_string());
            }
            SqlErrorClass::Timeout => {
                parts.push("The query was too slow. Narrow the date range or aggregate earlier.".to_string());
            }
            SqlErrorClass::ExecutionError(_) => {
                parts.push("Fix the error and regenerate the query.".to_string());
            }
        }

        parts.join("\n")
    }
}
