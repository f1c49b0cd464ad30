//! Command tests that need no database
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;

use carddemo_cli::commands;
use carddemo_cli::LoadArgs;
use carddemo_common::RecordType;
use carddemo_loader::ingest::layout_for;
use tempfile::TempDir;

fn account_line(account_id: &str) -> String {
    layout_for(RecordType::Account)
        .render(&[
            ("account_id", account_id),
            ("active_status", "Y"),
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
        ])
        .unwrap()
}

fn write(dir: &TempDir, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

#[tokio::test]
async fn test_dry_run_load_from_directory() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "acctdata.txt",
        &[account_line("00000000001"), account_line("00000000002")],
    );

    let args = LoadArgs {
        input_dir: Some(dir.path().to_path_buf()),
        job_name: "dry-run".to_string(),
        dry_run: true,
        ..Default::default()
    };

    assert!(commands::load::run(&args, true).await.unwrap());
}

#[tokio::test]
async fn test_validate_reports_bad_records() {
    let dir = TempDir::new().unwrap();
    let good = write(&dir, "good.txt", &[account_line("00000000001")]);
    let bad = write(
        &dir,
        "bad.txt",
        &[account_line("00000000001"), "too short".to_string()],
    );

    assert!(commands::validate::run(&good, RecordType::Account, false)
        .await
        .unwrap());
    assert!(!commands::validate::run(&bad, RecordType::Account, false)
        .await
        .unwrap());
}
