//! Error types shared across the CardDemo workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("Checksum input must contain only ASCII digits: {0:?}")]
    NonDigitChecksumInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
