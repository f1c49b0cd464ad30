//! Typed records and per-record pipeline state

use bigdecimal::BigDecimal;
use carddemo_common::RecordType;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::loader::PartitionKey;
use crate::error::ErrorCategory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTypeRecord {
    pub type_code: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCategoryRecord {
    pub type_code: String,
    pub category_code: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub active: bool,
    pub current_balance: BigDecimal,
    pub credit_limit: BigDecimal,
    pub cash_credit_limit: BigDecimal,
    pub open_date: NaiveDate,
    pub expiration_date: Option<NaiveDate>,
    pub reissue_date: Option<NaiveDate>,
    pub current_cycle_credit: BigDecimal,
    pub current_cycle_debit: BigDecimal,
    pub address_zip: Option<String>,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub card_number: String,
    pub account_id: String,
    pub cvv: String,
    pub embossed_name: String,
    pub expiration_date: NaiveDate,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardXrefRecord {
    pub card_number: String,
    pub customer_id: String,
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub type_code: String,
    pub category_code: String,
    pub source: Option<String>,
    pub description: Option<String>,
    pub amount: BigDecimal,
    pub merchant_id: Option<String>,
    pub merchant_name: String,
    pub merchant_city: Option<String>,
    pub merchant_zip: Option<String>,
    pub card_number: String,
    pub original_timestamp: NaiveDateTime,
    pub processed_timestamp: NaiveDateTime,
}

/// A transaction with its resolved owning account and customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTransaction {
    pub record: TransactionRecord,
    pub account_id: String,
    pub customer_id: Option<String>,
}

/// Output of the validation stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainRecord {
    TransactionType(TransactionTypeRecord),
    TransactionCategory(TransactionCategoryRecord),
    Account(AccountRecord),
    Card(CardRecord),
    CardXref(CardXrefRecord),
    Transaction(TransactionRecord),
}

impl DomainRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            DomainRecord::TransactionType(_) => RecordType::TransactionType,
            DomainRecord::TransactionCategory(_) => RecordType::TransactionCategory,
            DomainRecord::Account(_) => RecordType::Account,
            DomainRecord::Card(_) => RecordType::Card,
            DomainRecord::CardXref(_) => RecordType::CardXref,
            DomainRecord::Transaction(_) => RecordType::Transaction,
        }
    }

    pub fn key(&self) -> String {
        match self {
            DomainRecord::TransactionType(r) => r.type_code.clone(),
            DomainRecord::TransactionCategory(r) => format!("{}{}", r.type_code, r.category_code),
            DomainRecord::Account(r) => r.account_id.clone(),
            DomainRecord::Card(r) => r.card_number.clone(),
            DomainRecord::CardXref(r) => r.card_number.clone(),
            DomainRecord::Transaction(r) => r.transaction_id.clone(),
        }
    }
}

/// Output of the resolution stage, ready for the bulk loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistableRow {
    TransactionType(TransactionTypeRecord),
    TransactionCategory(TransactionCategoryRecord),
    Account(AccountRecord),
    Card(CardRecord),
    CardXref(CardXrefRecord),
    Transaction(ResolvedTransaction),
}

impl PersistableRow {
    pub fn record_type(&self) -> RecordType {
        match self {
            PersistableRow::TransactionType(_) => RecordType::TransactionType,
            PersistableRow::TransactionCategory(_) => RecordType::TransactionCategory,
            PersistableRow::Account(_) => RecordType::Account,
            PersistableRow::Card(_) => RecordType::Card,
            PersistableRow::CardXref(_) => RecordType::CardXref,
            PersistableRow::Transaction(_) => RecordType::Transaction,
        }
    }

    /// Monthly partition the row lands in; only transactions are partitioned
    pub fn partition_key(&self) -> Option<PartitionKey> {
        match self {
            PersistableRow::Transaction(t) => {
                Some(PartitionKey::from_timestamp(&t.record.original_timestamp))
            },
            _ => None,
        }
    }
}

/// Identifies a source record in skip reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_type: RecordType,
    pub line_number: u64,
    /// Natural key, when it could be decoded
    pub key: Option<String>,
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} line {}", self.record_type, self.line_number)?;
        if let Some(key) = &self.key {
            write!(f, " ({})", key)?;
        }
        Ok(())
    }
}

/// Pipeline stage at which a record was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decode,
    Validate,
    Resolve,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Validate => "validate",
            Stage::Resolve => "resolve",
            Stage::Load => "load",
        }
    }
}

/// Audit entry for a record that did not load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub record_ref: RecordRef,
    pub stage: Stage,
    pub category: ErrorCategory,
    pub error_kind: String,
    pub message: String,
}

impl std::fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} error ({}): {}",
            self.record_ref, self.category, self.error_kind, self.message
        )
    }
}

/// Lifecycle of one input line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Decoded,
    Validated,
    Resolved,
    Loaded,
    Skipped { stage: Stage, category: ErrorCategory },
    FailedFatal,
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::Loaded | RecordState::Skipped { .. } | RecordState::FailedFatal
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_only_transactions_have_partition_keys() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 18)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let txn = ResolvedTransaction {
            record: TransactionRecord {
                transaction_id: "0000000000000001".into(),
                type_code: "01".into(),
                category_code: "0001".into(),
                source: None,
                description: None,
                amount: BigDecimal::from_str("1.00").unwrap(),
                merchant_id: None,
                merchant_name: "STORE".into(),
                merchant_city: None,
                merchant_zip: None,
                card_number: "4532015112830366".into(),
                original_timestamp: ts,
                processed_timestamp: ts,
            },
            account_id: "00000000001".into(),
            customer_id: None,
        };

        let key = PersistableRow::Transaction(txn).partition_key().unwrap();
        assert_eq!(key.to_string(), "2024-03");

        let row = PersistableRow::TransactionType(TransactionTypeRecord {
            type_code: "01".into(),
            description: "Purchase".into(),
        });
        assert!(row.partition_key().is_none());
    }

    #[test]
    fn test_record_ref_display() {
        let r = RecordRef {
            record_type: RecordType::Card,
            line_number: 12,
            key: Some("4532015112830366".into()),
        };
        assert_eq!(r.to_string(), "card line 12 (4532015112830366)");
    }

    #[test]
    fn test_terminal_states() {
        assert!(RecordState::Loaded.is_terminal());
        assert!(RecordState::FailedFatal.is_terminal());
        assert!(!RecordState::Resolved.is_terminal());
    }
}
