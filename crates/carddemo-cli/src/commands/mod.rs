//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function returning
//! whether the process should exit successfully.

pub mod load;
pub mod migrate_db;
pub mod validate;

use carddemo_loader::config::Config;
use carddemo_loader::ingest::models::ValidationOutcome;
use carddemo_loader::ingest::BatchSummary;

use crate::error::{CliError, Result};

/// Skip reasons printed in text mode; JSON output carries the whole capped list
const PRINTED_SKIP_REASONS: usize = 20;

fn load_config() -> Result<Config> {
    Config::load().map_err(CliError::config)
}

fn print_summary(summary: &BatchSummary) {
    let by_category = &summary.skipped_by_category;
    println!("  Records seen:   {}", summary.total_seen);
    println!("  Loaded:         {}", summary.succeeded);
    println!(
        "  Skipped:        {} (format {}, validation {}, reference {}, rejected {})",
        summary.skipped,
        by_category.format,
        by_category.validation,
        by_category.reference,
        by_category.rejected
    );
    if summary.failed_fatal > 0 {
        println!("  Failed (fatal): {}", summary.failed_fatal);
    }
}

fn print_skip_reasons(skip_reasons: &[ValidationOutcome]) {
    if skip_reasons.is_empty() {
        return;
    }
    println!();
    println!("Skipped records:");
    for outcome in skip_reasons.iter().take(PRINTED_SKIP_REASONS) {
        println!("  {}", outcome);
    }
    if skip_reasons.len() > PRINTED_SKIP_REASONS {
        println!("  ... and {} more", skip_reasons.len() - PRINTED_SKIP_REASONS);
    }
}
