//! Error types for aegis-core.

use thiserror::Error;

/// Result type alias using aegis-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during governance runtime operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage layer failure (SQLite, file backends)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Specification DSL parse failure
    #[error("Parse error: {message} (at: {fragment})")]
    Parse { message: String, fragment: String },

    /// Strict-mode specification validation failure
    #[error("Specification '{spec_name}' violated: {summary}")]
    SpecViolation {
        spec_name: String,
        summary: String,
        violations: Vec<crate::specs::ValidationResult>,
    },

    /// A named runtime limit was crossed
    #[error("Limit '{name}' exceeded: {actual} > {limit}")]
    LimitExceeded {
        name: String,
        limit: i64,
        actual: i64,
    },

    /// Vector index is at capacity
    #[error("Index at capacity ({max_elements})")]
    Capacity { max_elements: usize },

    /// Schema/structural validation failure
    #[error("Validation error: {0}")]
    Validation(String),

    /// LLM client or judge failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timed out
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a parse error with the offending fragment.
    pub fn parse(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            fragment: fragment.into(),
        }
    }

    /// Create a limit-exceeded error.
    pub fn limit_exceeded(name: impl Into<String>, limit: i64, actual: i64) -> Self {
        Self::LimitExceeded {
            name: name.into(),
            limit,
            actual,
        }
    }

    /// Create an LLM error.
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }
}
