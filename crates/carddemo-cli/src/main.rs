//! CardDemo migration CLI - Main entry point

use std::process;

use carddemo_cli::{commands, Cli, Commands};
use carddemo_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .output(LogOutput::Console)
        .log_file_prefix("carddemo-migrate")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The guard flushes file output on drop
    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    let result = match &cli.command {
        Commands::Load(args) => commands::load::run(args, cli.json).await,
        Commands::Validate { file, record_type } => {
            commands::validate::run(file, *record_type, cli.json).await
        },
        Commands::MigrateDb => commands::migrate_db::run().await,
    };

    let code = match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            2
        },
    };

    drop(guard);
    process::exit(code);
}
