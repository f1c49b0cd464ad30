//! `carddemo-migrate load` command implementation

use std::sync::Arc;

use carddemo_loader::db;
use carddemo_loader::ingest::jobs::JobStatus;
use carddemo_loader::ingest::memory::MemoryStore;
use carddemo_loader::ingest::storage::PgStore;
use carddemo_loader::ingest::{JobReport, MigrationJob};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{load_config, print_skip_reasons, print_summary};
use crate::error::{CliError, Result};
use crate::LoadArgs;

/// Runs the job; succeeds only when it completes
pub async fn run(args: &LoadArgs, json: bool) -> Result<bool> {
    let inputs = args.inputs()?;

    let mut config = load_config()?;
    if let Some(chunk_size) = args.chunk_size {
        config.pipeline.chunk_size = chunk_size;
    }
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    config.validate().map_err(CliError::config)?;

    let job = if args.dry_run {
        info!("Dry run, loading into memory");
        MigrationJob::from_store(Arc::new(MemoryStore::new()), &config)
    } else {
        let pool = db::create_pool(&config.db_config()).await?;
        db::health_check(&pool).await?;
        if args.migrate {
            db::run_migrations(&pool).await?;
        }
        MigrationJob::from_store(Arc::new(PgStore::new(pool)), &config)
    }
    .map_err(CliError::config)?;

    let interrupt = tokio::spawn(cancel_on_interrupt(job.cancellation_token()));
    let report = job.run(&args.job_name, &inputs).await;
    interrupt.abort();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, args.dry_run);
    }

    Ok(report.status == JobStatus::Completed)
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, stopping after in-flight chunks");
        cancel.cancel();
    }
}

fn print_report(report: &JobReport, dry_run: bool) {
    let mode = if dry_run { " [dry run]" } else { "" };
    println!(
        "Job '{}' ({}){}: {} in {:.2}s",
        report.job_name, report.job_id, mode, report.status, report.duration_secs
    );
    print_summary(&report.summary);

    if !report.phases.is_empty() {
        println!();
        println!("Phases:");
        for phase in &report.phases {
            println!(
                "  {:<22} chunks {:>6}  loaded {:>9}  skipped {:>9}",
                phase.record_type.to_string(),
                phase.chunks,
                phase.loaded,
                phase.skipped
            );
        }
    }

    if let Some(failure) = &report.failure_point {
        println!();
        println!("Stopped at {}", failure);
    }

    print_skip_reasons(&report.skip_reasons);
}
