//! Common test utilities for loader integration tests
//!
//! - Fixed-width line builders for every record type
//! - Temporary input files
//! - A PostgreSQL container with migrations applied (Docker required)
#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use carddemo_common::RecordType;
use carddemo_loader::ingest::layout_for;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tempfile::TempDir;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

// ============================================================================
// Fixed-width fixtures
// ============================================================================

pub const ACCOUNT_ID: &str = "00000000001";
pub const CUSTOMER_ID: &str = "000000001";
pub const CARD_NUMBER: &str = "4532015112830366";

/// Luhn-valid card numbers for tests needing several distinct cards
pub const CARD_NUMBERS: [&str; 5] = [
    "4532015112830366",
    "4111111111111111",
    "5555555555554444",
    "4012888888881881",
    "6011111111111117",
];

pub fn render(record_type: RecordType, values: &[(&str, &str)]) -> String {
    layout_for(record_type)
        .render(values)
        .expect("fixture values fit the layout")
}

pub fn transaction_type_line(code: &str, description: &str) -> String {
    render(
        RecordType::TransactionType,
        &[("type_code", code), ("description", description)],
    )
}

pub fn transaction_category_line(type_code: &str, category_code: &str, description: &str) -> String {
    render(
        RecordType::TransactionCategory,
        &[
            ("type_code", type_code),
            ("category_code", category_code),
            ("description", description),
        ],
    )
}

pub fn account_line(account_id: &str, active: &str) -> String {
    render(
        RecordType::Account,
        &[
            ("account_id", account_id),
            ("active_status", active),
            ("current_balance", "00000012345{"),
            ("credit_limit", "00000500000{"),
            ("cash_credit_limit", "00000100000{"),
            ("open_date", "2020-01-15"),
            ("expiration_date", "2030-01-15"),
            ("reissue_date", ""),
            ("current_cycle_credit", "00000000000{"),
            ("current_cycle_debit", "00000002500{"),
            ("address_zip", "10001"),
            ("group_id", "DEFAULT"),
        ],
    )
}

pub fn card_line(card_number: &str, account_id: &str, expiration: &str, active: &str) -> String {
    render(
        RecordType::Card,
        &[
            ("card_number", card_number),
            ("account_id", account_id),
            ("cvv", "123"),
            ("embossed_name", "JOHN DOE"),
            ("expiration_date", expiration),
            ("active_status", active),
        ],
    )
}

pub fn xref_line(card_number: &str, customer_id: &str, account_id: &str) -> String {
    render(
        RecordType::CardXref,
        &[
            ("card_number", card_number),
            ("customer_id", customer_id),
            ("account_id", account_id),
        ],
    )
}

/// Nightly posting time stamped on fixture transactions
pub const PROCESSED_TIMESTAMP: &str = "2024-05-01-02.00.00.000000";

/// Purchase (type 01, category 0001) of `amount` in legacy encoding
pub fn transaction_line(transaction_id: &str, card_number: &str, amount: &str, timestamp: &str) -> String {
    posted_transaction_line(transaction_id, card_number, amount, timestamp, PROCESSED_TIMESTAMP)
}

pub fn posted_transaction_line(
    transaction_id: &str,
    card_number: &str,
    amount: &str,
    timestamp: &str,
    processed: &str,
) -> String {
    render(
        RecordType::Transaction,
        &[
            ("transaction_id", transaction_id),
            ("type_code", "01"),
            ("category_code", "0001"),
            ("source", "POS TERM"),
            ("description", "Purchase at store"),
            ("amount", amount),
            ("merchant_id", "800000001"),
            ("merchant_name", "CORNER STORE"),
            ("merchant_city", "NEW YORK"),
            ("merchant_zip", "10001"),
            ("card_number", card_number),
            ("original_timestamp", timestamp),
            ("processed_timestamp", processed),
        ],
    )
}

/// Input files in a temporary directory removed on drop
pub struct InputDir {
    dir: TempDir,
}

impl InputDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn write(&self, name: &str, lines: &[String]) -> PathBuf {
        let path = self.dir.path().join(name);
        let mut content = lines.join("\n");
        content.push('\n');
        std::fs::write(&path, content).expect("write input file");
        path
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        carddemo_loader::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { container, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}
