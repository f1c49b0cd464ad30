//! End-to-end pipeline tests against the in-memory store
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use carddemo_common::RecordType;
use carddemo_loader::config::Config;
use carddemo_loader::error::{ErrorCategory, PersistenceError};
use carddemo_loader::ingest::jobs::JobStatus;
use carddemo_loader::ingest::memory::MemoryStore;
use carddemo_loader::ingest::models::Stage;
use carddemo_loader::ingest::pipeline::check_file;
use carddemo_loader::ingest::{JobInputs, MigrationJob, PartitionKey};
use chrono::NaiveDate;
use common::*;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

fn config(chunk_size: usize, workers: usize) -> Config {
    let mut config = Config::default();
    config.pipeline.chunk_size = chunk_size;
    config.pipeline.workers = workers;
    config.persistence.retry_base_delay_ms = 1;
    config.persistence.retry_max_delay_ms = 5;
    config
}

fn job(store: &Arc<MemoryStore>, config: &Config) -> MigrationJob {
    MigrationJob::from_store(store.clone(), config)
        .unwrap()
        .with_today(today())
}

fn reference_inputs(dir: &InputDir) -> JobInputs {
    JobInputs::default()
        .with_transaction_types(dir.write("trantype.txt", &[transaction_type_line("01", "Purchase")]))
        .with_transaction_categories(dir.write(
            "trancatg.txt",
            &[transaction_category_line("01", "0001", "Regular Sales Draft")],
        ))
        .with_accounts(dir.write("acctdata.txt", &[account_line(ACCOUNT_ID, "Y")]))
}

#[tokio::test]
async fn test_valid_card_is_loaded() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    let config = config(500, 4);

    job(&store, &config)
        .run("accounts", &reference_inputs(&dir))
        .await
        .unwrap();

    let cards = JobInputs::default().with_cards(dir.write(
        "carddata.txt",
        &[card_line(CARD_NUMBER, ACCOUNT_ID, "2027-01-15", "Y")],
    ));
    let report = job(&store, &config).run("cards", &cards).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.summary.total_seen, 1);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.skipped, 0);
    assert_eq!(store.row_count(RecordType::Card), 1);
}

#[tokio::test]
async fn test_expired_card_is_skipped() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    let config = config(500, 4);

    job(&store, &config)
        .run("accounts", &reference_inputs(&dir))
        .await
        .unwrap();

    let cards = JobInputs::default().with_cards(dir.write(
        "carddata.txt",
        &[card_line(CARD_NUMBER, ACCOUNT_ID, "2024-12-31", "Y")],
    ));
    let report = job(&store, &config).run("cards", &cards).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.summary.total_seen, 1);
    assert_eq!(report.summary.succeeded, 0);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.skipped_by_category.validation, 1);

    let reason = &report.skip_reasons[0];
    assert_eq!(reason.category, ErrorCategory::Validation);
    assert_eq!(reason.stage, Stage::Validate);
    assert_eq!(reason.error_kind, "expired");
    assert_eq!(reason.record_ref.line_number, 1);

    assert_eq!(store.skips(report.job_id), report.skip_reasons);
    assert_eq!(store.row_count(RecordType::Card), 0);
}

#[tokio::test]
async fn test_full_chain_resolves_and_partitions() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    let config = config(2, 4);

    let inputs = reference_inputs(&dir)
        .with_cards(dir.write(
            "carddata.txt",
            &[
                card_line(CARD_NUMBERS[0], ACCOUNT_ID, "2027-01-15", "Y"),
                card_line(CARD_NUMBERS[1], ACCOUNT_ID, "2027-01-15", "N"),
                card_line(CARD_NUMBERS[2], "00000000099", "2027-01-15", "Y"),
            ],
        ))
        .with_card_xrefs(dir.write(
            "cardxref.txt",
            &[xref_line(CARD_NUMBERS[0], CUSTOMER_ID, ACCOUNT_ID)],
        ))
        .with_transactions(dir.write(
            "dailytran.txt",
            &[
                transaction_line("0000000000000001", CARD_NUMBERS[0], "0000012345{", "2024-03-18-10.15.30.000000"),
                transaction_line("0000000000000002", CARD_NUMBERS[0], "0000000500}", "2024-04-02 08:00:00"),
                transaction_line("0000000000000003", CARD_NUMBERS[1], "0000001000{", "2024-03-19-11.00.00.000000"),
                transaction_line("0000000000000004", CARD_NUMBERS[4], "0000001000{", "2024-03-19-11.00.00.000000"),
                transaction_line("0000000000000005", CARD_NUMBERS[0], "00000ABC45{", "2024-03-19-11.00.00.000000"),
                String::new(),
                "short line".to_string(),
            ],
        ));

    let report = job(&store, &config).run("nightly", &inputs).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert!(report.failure_point.is_none());

    // 3 reference rows, 3 cards, 1 xref, 6 non-blank transaction lines
    let s = report.summary;
    assert_eq!(s.total_seen, 13);
    assert_eq!(s.succeeded, 3 + 2 + 1 + 2);
    assert_eq!(s.skipped, 5);
    assert_eq!(s.failed_fatal, 0);
    assert_eq!(s.total_seen, s.succeeded + s.skipped + s.failed_fatal);
    // card with a missing account, inactive card, unknown card
    assert_eq!(s.skipped_by_category.reference, 3);
    // bad amount, short line
    assert_eq!(s.skipped_by_category.format, 2);

    assert_eq!(
        store.partitions(),
        vec![PartitionKey::new(2024, 3).unwrap(), PartitionKey::new(2024, 4).unwrap()]
    );

    let mut txns = store.transactions();
    txns.sort_by(|a, b| a.record.transaction_id.cmp(&b.record.transaction_id));
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0].account_id, ACCOUNT_ID);
    assert_eq!(txns[0].customer_id.as_deref(), Some(CUSTOMER_ID));
    assert_eq!(txns[0].record.amount, BigDecimal::from_str("123.45").unwrap());
    assert_eq!(txns[1].record.amount, BigDecimal::from_str("-5.00").unwrap());
    assert_eq!(
        txns[1].record.processed_timestamp,
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(2, 0, 0).unwrap()
    );

    let account = store.account(ACCOUNT_ID).unwrap();
    assert_eq!(account.current_balance.to_string(), "123.45");

    let reasons: Vec<_> = report
        .skip_reasons
        .iter()
        .filter(|o| o.record_ref.record_type == RecordType::Transaction)
        .map(|o| (o.record_ref.line_number, o.error_kind.as_str()))
        .collect();
    assert!(reasons.contains(&(3, "card_inactive")));
    assert!(reasons.contains(&(4, "card_not_found")));
    assert!(reasons.contains(&(7, "length_mismatch")));
    assert_eq!(store.skips(report.job_id).len(), 5);
}

#[tokio::test]
async fn test_partition_created_once_across_concurrent_chunks() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    let config = config(2, 4);

    let transactions: Vec<String> = (1..=20)
        .map(|i| {
            transaction_line(
                &format!("{:016}", i),
                CARD_NUMBER,
                "0000001000{",
                &format!("2024-03-{:02}-12.00.00.000000", i),
            )
        })
        .collect();

    let inputs = reference_inputs(&dir)
        .with_cards(dir.write(
            "carddata.txt",
            &[card_line(CARD_NUMBER, ACCOUNT_ID, "2027-01-15", "Y")],
        ))
        .with_transactions(dir.write("dailytran.txt", &transactions));

    let report = job(&store, &config).run("march", &inputs).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(store.row_count(RecordType::Transaction), 20);
    assert_eq!(store.partition_creations(), 1);
    assert_eq!(store.partitions(), vec![PartitionKey::new(2024, 3).unwrap()]);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    store.inject_transient_failures(2);

    let report = job(&store, &config(500, 1))
        .run("retry", &reference_inputs(&dir))
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.summary.succeeded, 3);
    // three single-chunk phases, the first one attempted three times
    assert_eq!(store.insert_calls(), 5);
}

#[tokio::test]
async fn test_fatal_chunk_stops_job_with_failure_point() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    let config = config(2, 1);

    job(&store, &config)
        .run("accounts", &reference_inputs(&dir))
        .await
        .unwrap();

    store.inject_failure(PersistenceError::Fatal("relation \"cards\" does not exist".into()));
    let cards = JobInputs::default().with_cards(dir.write(
        "carddata.txt",
        &[
            card_line(CARD_NUMBERS[0], ACCOUNT_ID, "2027-01-15", "Y"),
            card_line(CARD_NUMBERS[1], ACCOUNT_ID, "2027-01-15", "Y"),
            card_line(CARD_NUMBERS[2], ACCOUNT_ID, "2027-01-15", "Y"),
        ],
    ));
    let report = job(&store, &config).run("cards", &cards).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    let failure = report.failure_point.unwrap();
    assert_eq!(failure.record_type, RecordType::Card);
    assert_eq!(failure.chunk, Some(0));
    assert_eq!(failure.first_line, Some(1));
    assert_eq!(failure.last_line, Some(2));

    // the second chunk is never pulled
    assert_eq!(report.summary.total_seen, 2);
    assert_eq!(report.summary.failed_fatal, 2);
    assert_eq!(store.row_count(RecordType::Card), 0);

    let ledger = store
        .jobs()
        .into_iter()
        .find(|j| j.id == report.job_id)
        .unwrap();
    assert_eq!(ledger.status, JobStatus::Failed);
    assert_eq!(ledger.summary.failed_fatal, 2);
    assert!(ledger.error.unwrap().contains("card chunk 0 (lines 1-2)"));
}

#[tokio::test]
async fn test_constraint_violation_rejects_whole_chunk() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());

    let mut accounts: Vec<String> = (1..=9)
        .map(|i| account_line(&format!("{:011}", i), "Y"))
        .collect();
    accounts.push(account_line(&format!("{:011}", 1), "Y"));

    let inputs = JobInputs::default().with_accounts(dir.write("acctdata.txt", &accounts));
    let report = job(&store, &config(10, 1)).run("dup", &inputs).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(store.row_count(RecordType::Account), 0);
    assert_eq!(report.summary.skipped, 10);
    assert_eq!(report.summary.skipped_by_category.rejected, 10);
    assert!(report
        .skip_reasons
        .iter()
        .all(|o| o.stage == Stage::Load && o.error_kind == "constraint"));
}

async fn load_card(store: &Arc<MemoryStore>, config: &Config, dir: &InputDir) {
    let inputs = reference_inputs(dir).with_cards(dir.write(
        "carddata.txt",
        &[card_line(CARD_NUMBER, ACCOUNT_ID, "2027-01-15", "Y")],
    ));
    let report = job(store, config).run("setup", &inputs).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_blank_processed_timestamp_is_skipped() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    let config = config(500, 1);
    load_card(&store, &config, &dir).await;

    let transactions = JobInputs::default().with_transactions(dir.write(
        "dailytran.txt",
        &[
            transaction_line("0000000000000001", CARD_NUMBER, "0000001000{", "2024-03-18-10.15.30.000000"),
            posted_transaction_line(
                "0000000000000002",
                CARD_NUMBER,
                "0000001000{",
                "2024-03-18-11.00.00.000000",
                "",
            ),
        ],
    ));
    let report = job(&store, &config).run("txns", &transactions).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.skipped_by_category.validation, 1);

    let reason = &report.skip_reasons[0];
    assert_eq!(reason.record_ref.line_number, 2);
    assert_eq!(reason.stage, Stage::Validate);
    assert_eq!(reason.error_kind, "required");
    assert!(reason.message.contains("processed_timestamp"));
    assert_eq!(store.row_count(RecordType::Transaction), 1);
}

#[tokio::test]
async fn test_transaction_id_reused_in_another_month_is_rejected() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    let config = config(1, 1);
    load_card(&store, &config, &dir).await;

    let transactions = JobInputs::default().with_transactions(dir.write(
        "dailytran.txt",
        &[
            transaction_line("0000000000000001", CARD_NUMBER, "0000001000{", "2024-03-18-10.15.30.000000"),
            transaction_line("0000000000000001", CARD_NUMBER, "0000002000{", "2024-05-18-10.15.30.000000"),
        ],
    ));
    let report = job(&store, &config).run("txns", &transactions).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.skipped_by_category.rejected, 1);

    let reason = &report.skip_reasons[0];
    assert_eq!(reason.record_ref.line_number, 2);
    assert_eq!(reason.stage, Stage::Load);
    assert_eq!(reason.error_kind, "constraint");

    let txns = store.transactions();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].record.amount, BigDecimal::from_str("10.00").unwrap());
}

#[tokio::test]
async fn test_partition_failure_stops_job() {
    let dir = InputDir::new();
    let store = Arc::new(MemoryStore::new());
    let config = config(2, 1);
    load_card(&store, &config, &dir).await;

    store.inject_partition_failure(PersistenceError::Fatal(
        "permission denied for schema public".into(),
    ));
    let calls = store.insert_calls();
    let transactions = JobInputs::default().with_transactions(dir.write(
        "dailytran.txt",
        &[
            transaction_line("0000000000000001", CARD_NUMBER, "0000001000{", "2024-03-18-10.15.30.000000"),
            transaction_line("0000000000000002", CARD_NUMBER, "0000001000{", "2024-03-19-10.15.30.000000"),
            transaction_line("0000000000000003", CARD_NUMBER, "0000001000{", "2024-03-20-10.15.30.000000"),
        ],
    ));
    let report = job(&store, &config).run("txns", &transactions).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    let failure = report.failure_point.unwrap();
    assert_eq!(failure.record_type, RecordType::Transaction);
    assert_eq!(failure.chunk, Some(0));
    assert!(failure
        .error
        .contains("failed to create partition 2024-03: permission denied"));

    assert_eq!(report.summary.failed_fatal, 2);
    assert_eq!(report.summary.succeeded, 0);
    // the chunk never reaches the insert
    assert_eq!(store.insert_calls(), calls);
    assert!(store.partitions().is_empty());
    assert_eq!(store.row_count(RecordType::Transaction), 0);

    let ledger = store
        .jobs()
        .into_iter()
        .find(|j| j.id == report.job_id)
        .unwrap();
    assert_eq!(ledger.status, JobStatus::Failed);
    assert!(ledger.error.unwrap().contains("transaction chunk 0 (lines 1-2)"));
}

#[tokio::test]
async fn test_check_file_validates_without_store() {
    let dir = InputDir::new();
    let path = dir.write(
        "carddata.txt",
        &[
            card_line(CARD_NUMBER, ACCOUNT_ID, "2027-01-15", "Y"),
            card_line("4532015112830367", ACCOUNT_ID, "2027-01-15", "Y"),
            "too short".to_string(),
        ],
    );

    let config = Config::default();
    let ctx = config.validation_context(today()).unwrap();
    let report = check_file(&path, RecordType::Card, &ctx, 100).await.unwrap();

    assert_eq!(report.summary.total_seen, 3);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.skipped_by_category.validation, 1);
    assert_eq!(report.summary.skipped_by_category.format, 1);
    assert_eq!(report.skip_reasons[0].error_kind, "checksum");
}
