//! Error taxonomy for the migration pipeline
//!
//! Record-level errors ([`FormatError`] and the validation/reference
//! outcomes) are recovered by skipping the record. Chunk-level errors
//! ([`LoadError`]) either reject the chunk ([`LoadError::Rejected`]) or are
//! fatal and stop the job.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed legacy text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("line is {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("non-ASCII byte at column {column}")]
    InvalidEncoding { column: usize },

    #[error("invalid numeric value: {0}")]
    InvalidNumeric(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl FormatError {
    pub fn kind(&self) -> FormatErrorKind {
        match self {
            FormatError::LengthMismatch { .. } => FormatErrorKind::LengthMismatch,
            FormatError::InvalidEncoding { .. } => FormatErrorKind::InvalidEncoding,
            FormatError::InvalidNumeric(_) => FormatErrorKind::InvalidNumeric,
            FormatError::InvalidDate(_) => FormatErrorKind::InvalidDate,
            FormatError::InvalidTimestamp(_) => FormatErrorKind::InvalidTimestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatErrorKind {
    LengthMismatch,
    InvalidEncoding,
    InvalidNumeric,
    InvalidDate,
    InvalidTimestamp,
}

impl FormatErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatErrorKind::LengthMismatch => "length_mismatch",
            FormatErrorKind::InvalidEncoding => "invalid_encoding",
            FormatErrorKind::InvalidNumeric => "invalid_numeric",
            FormatErrorKind::InvalidDate => "invalid_date",
            FormatErrorKind::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

/// Why a record was skipped; each category has its own counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Undecodable text
    Format,
    /// Field format, range, checksum or business rule
    Validation,
    /// Card or account missing or inactive
    Reference,
    /// Row belonged to a chunk the database rejected
    Rejected,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Format => "format",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Reference => "reference",
            ErrorCategory::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a persistence port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Serialization conflict, deadlock, lock or statement timeout, lost connection
    #[error("transient persistence failure: {0}")]
    Transient(String),

    /// Integrity constraint or value-too-long violation
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("persistence failure: {0}")]
    Fatal(String),
}

impl PersistenceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Transient(_))
    }
}

/// Classification of a PostgreSQL SQLSTATE code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStateClass {
    Transient,
    Constraint,
    Fatal,
}

pub fn classify_sqlstate(code: &str) -> SqlStateClass {
    match code {
        // serialization_failure, deadlock_detected, lock_not_available, query_canceled
        "40001" | "40P01" | "55P03" | "57014" => SqlStateClass::Transient,
        // string_data_right_truncation
        "22001" => SqlStateClass::Constraint,
        c if c.starts_with("23") => SqlStateClass::Constraint,
        _ => SqlStateClass::Fatal,
    }
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        match &err {
            sqlx::Error::Database(db_err) => {
                match db_err.code().as_deref().map(classify_sqlstate) {
                    Some(SqlStateClass::Transient) => PersistenceError::Transient(message),
                    Some(SqlStateClass::Constraint) => PersistenceError::Constraint(message),
                    _ => PersistenceError::Fatal(message),
                }
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => PersistenceError::Transient(message),
            _ => PersistenceError::Fatal(message),
        }
    }
}

/// Outcome of a failed chunk load
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The whole chunk was rolled back by a constraint; its rows are skipped
    #[error("chunk rejected: {0}")]
    Rejected(String),

    #[error("failed to create partition {partition}: {message}")]
    Partition { partition: String, message: String },

    #[error("chunk failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("reference lookup failed: {0}")]
    Lookup(String),

    #[error("persistence failure: {0}")]
    Fatal(String),
}

impl LoadError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LoadError::Rejected(_))
    }
}

/// Job-level failure
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("job ledger error: {0}")]
    Ledger(#[from] PersistenceError),
}
