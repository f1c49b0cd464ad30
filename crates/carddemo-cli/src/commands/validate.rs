//! `carddemo-migrate validate` command implementation
//!
//! Decodes and validates one file against the record rules. Cross-reference
//! checks need loaded parents and are left to `load --dry-run`.

use std::path::Path;

use carddemo_common::RecordType;
use carddemo_loader::ingest::pipeline::check_file;
use chrono::Utc;
use tracing::info;

use super::{load_config, print_skip_reasons, print_summary};
use crate::error::{CliError, Result};

/// Succeeds only when every record passes
pub async fn run(file: &Path, record_type: RecordType, json: bool) -> Result<bool> {
    let config = load_config()?;
    let validation = config
        .validation_context(Utc::now().date_naive())
        .map_err(CliError::config)?;

    info!(path = %file.display(), record_type = %record_type, "Validating file");

    let report = check_file(
        file,
        record_type,
        &validation,
        config.pipeline.max_skip_reasons,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{} ({})", file.display(), record_type);
        print_summary(&report.summary);
        print_skip_reasons(&report.skip_reasons);
    }

    Ok(report.summary.skipped == 0)
}
