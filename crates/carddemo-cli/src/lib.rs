//! CardDemo migration CLI
//!
//! Command-line front end for the legacy record migration:
//!
//! - **Load**: run a migration job over the legacy extract files (`carddemo-migrate load`)
//! - **Validate**: decode and validate one file without a database (`carddemo-migrate validate`)
//! - **Schema**: apply the SQL migrations (`carddemo-migrate migrate-db`)
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod error;

pub use error::{CliError, Result};

use std::path::{Path, PathBuf};

use carddemo_common::RecordType;
use carddemo_loader::ingest::JobInputs;
use clap::{Args, Parser, Subcommand};

/// File names of the legacy extracts, looked up under `--input-dir`
pub const DEFAULT_FILE_NAMES: [(RecordType, &str); 6] = [
    (RecordType::TransactionType, "trantype.txt"),
    (RecordType::TransactionCategory, "trancatg.txt"),
    (RecordType::Account, "acctdata.txt"),
    (RecordType::Card, "carddata.txt"),
    (RecordType::CardXref, "cardxref.txt"),
    (RecordType::Transaction, "dailytran.txt"),
];

/// CardDemo legacy record migration
#[derive(Parser, Debug)]
#[command(name = "carddemo-migrate")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging (LOG_* environment variables still take precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a migration job over legacy extract files
    Load(LoadArgs),

    /// Decode and validate a single file without touching a database
    Validate {
        /// Fixed-width input file
        file: PathBuf,

        /// Record type of every line in the file (e.g. card, acctdata, transaction)
        #[arg(short, long)]
        record_type: RecordType,
    },

    /// Apply the SQL schema migrations
    MigrateDb,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LoadArgs {
    /// Directory holding the extracts under their usual names (acctdata.txt, ...)
    #[arg(short, long)]
    pub input_dir: Option<PathBuf>,

    #[arg(long)]
    pub transaction_types: Option<PathBuf>,

    #[arg(long)]
    pub transaction_categories: Option<PathBuf>,

    #[arg(long)]
    pub accounts: Option<PathBuf>,

    #[arg(long)]
    pub cards: Option<PathBuf>,

    #[arg(long)]
    pub card_xrefs: Option<PathBuf>,

    #[arg(long)]
    pub transactions: Option<PathBuf>,

    /// Name recorded in the job ledger
    #[arg(long, default_value = "carddemo-migration")]
    pub job_name: String,

    /// Load into an in-memory store instead of PostgreSQL
    #[arg(long)]
    pub dry_run: bool,

    /// Apply schema migrations before loading
    #[arg(long, conflicts_with = "dry_run")]
    pub migrate: bool,

    /// Records per chunk (overrides MIGRATE_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Concurrent chunks (overrides MIGRATE_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,
}

impl LoadArgs {
    fn explicit(&self, record_type: RecordType) -> Option<&Path> {
        let path = match record_type {
            RecordType::TransactionType => &self.transaction_types,
            RecordType::TransactionCategory => &self.transaction_categories,
            RecordType::Account => &self.accounts,
            RecordType::Card => &self.cards,
            RecordType::CardXref => &self.card_xrefs,
            RecordType::Transaction => &self.transactions,
        };
        path.as_deref()
    }

    /// Input file per record type
    ///
    /// Explicit file arguments win over files found in `--input-dir`;
    /// extracts missing from the directory are left out of the job.
    pub fn inputs(&self) -> Result<JobInputs> {
        let mut inputs = JobInputs::default();

        for (record_type, file_name) in DEFAULT_FILE_NAMES {
            if let Some(path) = self.explicit(record_type) {
                inputs = inputs.with(record_type, path);
                continue;
            }
            if let Some(dir) = &self.input_dir {
                let path = dir.join(file_name);
                if path.is_file() {
                    inputs = inputs.with(record_type, path);
                }
            }
        }

        if inputs.is_empty() {
            return Err(CliError::NoInputs);
        }
        Ok(inputs)
    }
}
