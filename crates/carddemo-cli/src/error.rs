//! Error types for the migration CLI

use carddemo_loader::db::DbError;
use carddemo_loader::error::PipelineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}. Check your environment variables or .env file.")]
    Config(String),

    #[error("No input files. Pass --input-dir or at least one file argument such as --accounts.")]
    NoInputs,

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Failed to render report: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Keep the whole context chain of a configuration error
    pub fn config(error: anyhow::Error) -> Self {
        Self::Config(format!("{:#}", error))
    }
}
