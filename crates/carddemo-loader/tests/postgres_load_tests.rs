//! Loader tests against a real PostgreSQL (Docker required)
//!
//! Run with: `cargo test -p carddemo-loader --test postgres_load_tests -- --ignored`
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use carddemo_loader::config::Config;
use carddemo_loader::error::PersistenceError;
use carddemo_loader::ingest::jobs::JobStatus;
use carddemo_loader::ingest::loader::{ChunkStore, TransactionOptions};
use carddemo_loader::ingest::models::{AccountRecord, PersistableRow};
use carddemo_loader::ingest::storage::PgStore;
use carddemo_loader::ingest::{JobInputs, MigrationJob, PartitionKey};
use chrono::NaiveDate;
use common::*;

fn account(id: &str) -> PersistableRow {
    let amount = |s: &str| BigDecimal::from_str(s).unwrap();
    PersistableRow::Account(AccountRecord {
        account_id: id.to_string(),
        active: true,
        current_balance: amount("-12.34"),
        credit_limit: amount("5000.00"),
        cash_credit_limit: amount("1000.00"),
        open_date: NaiveDate::from_ymd_opt(2020, 1, 15).unwrap(),
        expiration_date: None,
        reissue_date: None,
        current_cycle_credit: amount("0.00"),
        current_cycle_debit: amount("25.00"),
        address_zip: Some("10001".to_string()),
        group_id: None,
    })
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_duplicate_key_rolls_back_whole_chunk() {
    let pg = TestPostgres::start().await.unwrap();
    let store = PgStore::new(pg.pool_clone());

    let mut rows: Vec<PersistableRow> = (1..=9).map(|i| account(&format!("{:011}", i))).collect();
    rows.push(account(&format!("{:011}", 3)));

    let err = store
        .insert_chunk(&rows, &TransactionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::Constraint(_)));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);

    let inserted = store
        .insert_chunk(&rows[..9], &TransactionOptions::default())
        .await
        .unwrap();
    assert_eq!(inserted, 9);

    let balance: BigDecimal =
        sqlx::query_scalar("SELECT current_balance FROM accounts WHERE account_id = $1")
            .bind(format!("{:011}", 1))
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert_eq!(balance, BigDecimal::from_str("-12.34").unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_partition_creation() {
    let pg = TestPostgres::start().await.unwrap();
    let store = Arc::new(PgStore::new(pg.pool_clone()));
    let key = PartitionKey::new(2024, 3).unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.create_partition(key).await })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert!(store.partition_exists(key).await.unwrap());

    let bounds: String = sqlx::query_scalar(
        "SELECT pg_get_expr(c.relpartbound, c.oid) FROM pg_class c WHERE c.relname = $1",
    )
    .bind(key.table_name())
    .fetch_one(pg.pool())
    .await
    .unwrap();
    assert!(bounds.contains("2024-03-01"), "{}", bounds);
    assert!(bounds.contains("2024-04-01"), "{}", bounds);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_job_against_postgres() {
    let pg = TestPostgres::start().await.unwrap();
    let store = Arc::new(PgStore::new(pg.pool_clone()));
    let dir = InputDir::new();

    let inputs = JobInputs::default()
        .with_transaction_types(dir.write("trantype.txt", &[transaction_type_line("01", "Purchase")]))
        .with_transaction_categories(dir.write(
            "trancatg.txt",
            &[transaction_category_line("01", "0001", "Regular Sales Draft")],
        ))
        .with_accounts(dir.write("acctdata.txt", &[account_line(ACCOUNT_ID, "Y")]))
        .with_cards(dir.write(
            "carddata.txt",
            &[card_line(CARD_NUMBER, ACCOUNT_ID, "2027-01-15", "Y")],
        ))
        .with_card_xrefs(dir.write(
            "cardxref.txt",
            &[xref_line(CARD_NUMBER, CUSTOMER_ID, ACCOUNT_ID)],
        ))
        .with_transactions(dir.write(
            "dailytran.txt",
            &[
                transaction_line("0000000000000001", CARD_NUMBER, "0000012345{", "2024-03-18-10.15.30.000000"),
                transaction_line("0000000000000002", CARD_NUMBER, "0000000500}", "2024-04-02-08.00.00.000000"),
                transaction_line("0000000000000003", CARD_NUMBERS[1], "0000000500{", "2024-04-02-08.00.00.000000"),
            ],
        ));

    let job = MigrationJob::from_store(store.clone(), &Config::default())
        .unwrap()
        .with_today(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
    let report = job.run("postgres", &inputs).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.summary.succeeded, 7);
    assert_eq!(report.summary.skipped_by_category.reference, 1);

    let rows: Vec<(String, BigDecimal, Option<String>)> = sqlx::query_as(
        "SELECT transaction_id, amount, customer_id FROM transactions ORDER BY transaction_id",
    )
    .fetch_all(pg.pool())
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, BigDecimal::from_str("123.45").unwrap());
    assert_eq!(rows[1].1, BigDecimal::from_str("-5.00").unwrap());
    assert_eq!(rows[0].2.as_deref(), Some(CUSTOMER_ID));

    let (status, succeeded): (String, i64) =
        sqlx::query_as("SELECT status, succeeded FROM migration_jobs WHERE id = $1")
            .bind(report.job_id)
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert_eq!(status, "completed");
    assert_eq!(succeeded, 7);

    let skips: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migration_skips WHERE job_id = $1")
        .bind(report.job_id)
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(skips, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_transaction_id_unique_across_partitions() {
    let pg = TestPostgres::start().await.unwrap();
    let store = Arc::new(PgStore::new(pg.pool_clone()));
    let dir = InputDir::new();

    let inputs = JobInputs::default()
        .with_transaction_types(dir.write("trantype.txt", &[transaction_type_line("01", "Purchase")]))
        .with_transaction_categories(dir.write(
            "trancatg.txt",
            &[transaction_category_line("01", "0001", "Regular Sales Draft")],
        ))
        .with_accounts(dir.write("acctdata.txt", &[account_line(ACCOUNT_ID, "Y")]))
        .with_cards(dir.write(
            "carddata.txt",
            &[card_line(CARD_NUMBER, ACCOUNT_ID, "2027-01-15", "Y")],
        ))
        .with_transactions(dir.write(
            "dailytran.txt",
            &[
                transaction_line("0000000000000001", CARD_NUMBER, "0000001000{", "2024-03-18-10.15.30.000000"),
                transaction_line("0000000000000001", CARD_NUMBER, "0000002000{", "2024-05-18-10.15.30.000000"),
            ],
        ));

    let mut config = Config::default();
    config.pipeline.chunk_size = 1;
    config.pipeline.workers = 1;
    let job = MigrationJob::from_store(store.clone(), &config)
        .unwrap()
        .with_today(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
    let report = job.run("reused-id", &inputs).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.summary.skipped_by_category.rejected, 1);

    let rows: Vec<(String, BigDecimal)> =
        sqlx::query_as("SELECT transaction_id, amount FROM transactions")
            .fetch_all(pg.pool())
            .await
            .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, BigDecimal::from_str("10.00").unwrap());

    let ids: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transaction_ids")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(ids, 1);
}
