//! CardDemo record loader
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Migrates legacy fixed-width card, account and transaction extracts into
//! PostgreSQL without losing a cent of precision.
//!
//! Each input line flows through a fixed sequence of stages:
//!
//! 1. [`ingest::decoder`] slices the line by its [`ingest::layout`]
//! 2. [`ingest::decimal`] and [`ingest::validation`] build a typed record
//! 3. [`ingest::resolver`] attaches foreign keys (card → account → customer)
//! 4. [`ingest::loader`] commits whole chunks atomically into monthly partitions
//!
//! [`ingest::pipeline`] drives chunks through those stages concurrently and
//! [`ingest::orchestrator`] runs one pipeline per record type in dependency
//! order, recording the outcome in the job ledger.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use carddemo_loader::config::Config;
//! use carddemo_loader::ingest::memory::MemoryStore;
//! use carddemo_loader::ingest::orchestrator::{JobInputs, MigrationJob};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let store = Arc::new(MemoryStore::new());
//! let job = MigrationJob::from_store(store, &config)?;
//!
//! let inputs = JobInputs::default().with_cards("carddata.txt");
//! let report = job.run("nightly", &inputs).await?;
//! println!("{} records loaded", report.summary.succeeded);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;

pub use config::Config;
pub use error::{FormatError, LoadError, PersistenceError, PipelineError};
