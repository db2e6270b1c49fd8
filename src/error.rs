use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure codes raised while compiling a plan against the registry catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompileErrorCode {
    NoMetrics,
    UnknownMetric,
    UnknownDimension,
    UnknownFilterField,
    UnsupportedOperator,
    MixedTables,
}

impl CompileErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileErrorCode::NoMetrics => "NO_METRICS",
            CompileErrorCode::UnknownMetric => "UNKNOWN_METRIC",
            CompileErrorCode::UnknownDimension => "UNKNOWN_DIMENSION",
            CompileErrorCode::UnknownFilterField => "UNKNOWN_FILTER_FIELD",
            CompileErrorCode::UnsupportedOperator => "UNSUPPORTED_OPERATOR",
            CompileErrorCode::MixedTables => "MIXED_TABLES",
        }
    }
}

impl fmt::Display for CompileErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure codes raised by query execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionErrorCode {
    QueryError,
    QueryTimeout,
}

impl ExecutionErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorCode::QueryError => "QUERY_ERROR",
            ExecutionErrorCode::QueryTimeout => "QUERY_TIMEOUT",
        }
    }
}

impl fmt::Display for ExecutionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-wide error type.
///
/// Cloneable so that a single settled result can be handed to every caller
/// joined on a coalesced request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NlqError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM provider throttled the request: {0}")]
    RateLimited(String),

    #[error("Circuit open for provider '{0}'")]
    CircuitOpen(String),

    #[error("Intent parse error: {0}")]
    IntentParse(String),

    #[error("Compilation error [{code}]: {message}")]
    Compile {
        code: CompileErrorCode,
        message: String,
    },

    #[error("Execution error [{code}]: {message}")]
    Execution {
        code: ExecutionErrorCode,
        message: String,
    },

    #[error("SQL validation error: {0}")]
    SqlValidation(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl NlqError {
    pub fn compile(code: CompileErrorCode, message: impl Into<String>) -> Self {
        NlqError::Compile {
            code,
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        NlqError::Execution {
            code: ExecutionErrorCode::QueryError,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        NlqError::Execution {
            code: ExecutionErrorCode::QueryTimeout,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            NlqError::Execution {
                code: ExecutionErrorCode::QueryTimeout,
                ..
            }
        )
    }

    /// Errors that come from talking to the provider rather than from the
    /// content it returned.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            NlqError::Llm(_) | NlqError::RateLimited(_) | NlqError::CircuitOpen(_)
        )
    }

    /// Short class label used for counters and eval records
    pub fn class(&self) -> &'static str {
        match self {
            NlqError::Llm(_) => "llm",
            NlqError::RateLimited(_) => "rate_limited",
            NlqError::CircuitOpen(_) => "circuit_open",
            NlqError::IntentParse(_) => "intent_parse",
            NlqError::Compile { code, .. } => code.as_str(),
            NlqError::Execution { code, .. } => code.as_str(),
            NlqError::SqlValidation(_) => "sql_validation",
            NlqError::Catalog(_) => "catalog",
            NlqError::Database(_) => "database",
            NlqError::Config(_) => "config",
            NlqError::Io(_) => "io",
            NlqError::Json(_) => "json",
        }
    }
}

impl From<std::io::Error> for NlqError {
    fn from(err: std::io::Error) -> Self {
        NlqError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NlqError {
    fn from(err: serde_json::Error) -> Self {
        NlqError::Json(err.to_string())
    }
}

impl From<sqlx::Error> for NlqError {
    fn from(err: sqlx::Error) -> Self {
        NlqError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NlqError>;
