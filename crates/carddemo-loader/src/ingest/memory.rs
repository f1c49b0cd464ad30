//! In-memory store
//!
//! Implements every persistence port with the same observable semantics as
//! the PostgreSQL store: chunks are all-or-nothing, duplicate keys and
//! dangling foreign keys are constraint violations, and a transaction row
//! needs its monthly partition. Used by tests and dry runs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use carddemo_common::RecordType;
use chrono::{NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jobs::{JobLedger, JobStatus};
use super::loader::{ChunkStore, PartitionKey, TransactionOptions};
use super::models::{
    AccountRecord, CardRecord, CardXrefRecord, PersistableRow, ResolvedTransaction,
    TransactionCategoryRecord, TransactionTypeRecord, ValidationOutcome,
};
use super::pipeline::BatchSummary;
use super::reference::ReferenceCodeLookup;
use super::resolver::{AccountLookup, AccountRef, CardLookup, CardRef};
use crate::error::PersistenceError;

#[derive(Debug, Default)]
struct Tables {
    transaction_types: BTreeMap<String, TransactionTypeRecord>,
    transaction_categories: BTreeMap<(String, String), TransactionCategoryRecord>,
    accounts: BTreeMap<String, AccountRecord>,
    cards: BTreeMap<String, CardRecord>,
    card_xrefs: BTreeMap<String, CardXrefRecord>,
    transactions: BTreeMap<(String, NaiveDateTime), ResolvedTransaction>,
    transaction_ids: BTreeSet<String>,
    partitions: BTreeSet<PartitionKey>,
}

/// Key of a row inserted by the current chunk, for rollback
enum Inserted {
    TransactionType(String),
    TransactionCategory((String, String)),
    Account(String),
    Card(String),
    CardXref(String),
    Transaction((String, NaiveDateTime)),
}

impl Tables {
    fn insert(&mut self, row: &PersistableRow) -> Result<Inserted, PersistenceError> {
        match row {
            PersistableRow::TransactionType(r) => {
                if self.transaction_types.contains_key(&r.type_code) {
                    return Err(duplicate("transaction_types", &r.type_code));
                }
                self.transaction_types.insert(r.type_code.clone(), r.clone());
                Ok(Inserted::TransactionType(r.type_code.clone()))
            },
            PersistableRow::TransactionCategory(r) => {
                if !self.transaction_types.contains_key(&r.type_code) {
                    return Err(missing("transaction_categories", "transaction_types", &r.type_code));
                }
                let key = (r.type_code.clone(), r.category_code.clone());
                if self.transaction_categories.contains_key(&key) {
                    return Err(duplicate(
                        "transaction_categories",
                        &format!("{}/{}", key.0, key.1),
                    ));
                }
                self.transaction_categories.insert(key.clone(), r.clone());
                Ok(Inserted::TransactionCategory(key))
            },
            PersistableRow::Account(r) => {
                if self.accounts.contains_key(&r.account_id) {
                    return Err(duplicate("accounts", &r.account_id));
                }
                self.accounts.insert(r.account_id.clone(), r.clone());
                Ok(Inserted::Account(r.account_id.clone()))
            },
            PersistableRow::Card(r) => {
                if !self.accounts.contains_key(&r.account_id) {
                    return Err(missing("cards", "accounts", &r.account_id));
                }
                if self.cards.contains_key(&r.card_number) {
                    return Err(duplicate("cards", &r.card_number));
                }
                self.cards.insert(r.card_number.clone(), r.clone());
                Ok(Inserted::Card(r.card_number.clone()))
            },
            PersistableRow::CardXref(r) => {
                if !self.cards.contains_key(&r.card_number) {
                    return Err(missing("card_xref", "cards", &r.card_number));
                }
                if !self.accounts.contains_key(&r.account_id) {
                    return Err(missing("card_xref", "accounts", &r.account_id));
                }
                if self.card_xrefs.contains_key(&r.card_number) {
                    return Err(duplicate("card_xref", &r.card_number));
                }
                self.card_xrefs.insert(r.card_number.clone(), r.clone());
                Ok(Inserted::CardXref(r.card_number.clone()))
            },
            PersistableRow::Transaction(t) => {
                let partition = PartitionKey::from_timestamp(&t.record.original_timestamp);
                if !self.partitions.contains(&partition) {
                    return Err(PersistenceError::Constraint(format!(
                        "no partition of relation \"transactions\" found for {}",
                        partition
                    )));
                }
                if !self.cards.contains_key(&t.record.card_number) {
                    return Err(missing("transactions", "cards", &t.record.card_number));
                }
                if !self.accounts.contains_key(&t.account_id) {
                    return Err(missing("transactions", "accounts", &t.account_id));
                }
                if self.transaction_ids.contains(&t.record.transaction_id) {
                    return Err(duplicate("transaction_ids", &t.record.transaction_id));
                }
                let key = (t.record.transaction_id.clone(), t.record.original_timestamp);
                self.transaction_ids.insert(key.0.clone());
                self.transactions.insert(key.clone(), t.clone());
                Ok(Inserted::Transaction(key))
            },
        }
    }

    fn undo(&mut self, inserted: Inserted) {
        match inserted {
            Inserted::TransactionType(k) => {
                self.transaction_types.remove(&k);
            },
            Inserted::TransactionCategory(k) => {
                self.transaction_categories.remove(&k);
            },
            Inserted::Account(k) => {
                self.accounts.remove(&k);
            },
            Inserted::Card(k) => {
                self.cards.remove(&k);
            },
            Inserted::CardXref(k) => {
                self.card_xrefs.remove(&k);
            },
            Inserted::Transaction(k) => {
                self.transaction_ids.remove(&k.0);
                self.transactions.remove(&k);
            },
        }
    }
}

fn duplicate(table: &str, key: &str) -> PersistenceError {
    PersistenceError::Constraint(format!(
        "duplicate key value violates unique constraint \"{}_pkey\": {}",
        table, key
    ))
}

fn missing(table: &str, referenced: &str, key: &str) -> PersistenceError {
    PersistenceError::Constraint(format!(
        "insert or update on table \"{}\" violates foreign key constraint: {} not present in {}",
        table, key, referenced
    ))
}

/// Ledger entry of one job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntry {
    pub id: Uuid,
    pub job_name: String,
    pub status: JobStatus,
    pub summary: BatchSummary,
    pub error: Option<String>,
    pub started_at: chrono::DateTime<Utc>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    jobs: Mutex<BTreeMap<Uuid, JobEntry>>,
    skips: Mutex<Vec<(Uuid, ValidationOutcome)>>,
    injected: Mutex<VecDeque<PersistenceError>>,
    partition_failures: Mutex<VecDeque<PersistenceError>>,
    insert_calls: AtomicU64,
    partition_creations: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next chunk insert with `error`; queued failures are consumed in order
    pub fn inject_failure(&self, error: PersistenceError) {
        self.injected.lock().push_back(error);
    }

    /// Fail the next partition creation with `error`
    pub fn inject_partition_failure(&self, error: PersistenceError) {
        self.partition_failures.lock().push_back(error);
    }

    pub fn inject_transient_failures(&self, n: usize) {
        let mut injected = self.injected.lock();
        for _ in 0..n {
            injected.push_back(PersistenceError::Transient(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }
    }

    /// Chunk insert attempts, including failed ones
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Number of partitions actually created
    pub fn partition_creations(&self) -> u64 {
        self.partition_creations.load(Ordering::SeqCst)
    }

    pub fn partitions(&self) -> Vec<PartitionKey> {
        self.tables.lock().partitions.iter().copied().collect()
    }

    pub fn row_count(&self, record_type: RecordType) -> usize {
        let tables = self.tables.lock();
        match record_type {
            RecordType::TransactionType => tables.transaction_types.len(),
            RecordType::TransactionCategory => tables.transaction_categories.len(),
            RecordType::Account => tables.accounts.len(),
            RecordType::Card => tables.cards.len(),
            RecordType::CardXref => tables.card_xrefs.len(),
            RecordType::Transaction => tables.transactions.len(),
        }
    }

    pub fn account(&self, account_id: &str) -> Option<AccountRecord> {
        self.tables.lock().accounts.get(account_id).cloned()
    }

    pub fn transactions(&self) -> Vec<ResolvedTransaction> {
        self.tables.lock().transactions.values().cloned().collect()
    }

    pub fn jobs(&self) -> Vec<JobEntry> {
        self.jobs.lock().values().cloned().collect()
    }

    pub fn skips(&self, job_id: Uuid) -> Vec<ValidationOutcome> {
        self.skips
            .lock()
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, outcome)| outcome.clone())
            .collect()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn partition_exists(&self, key: PartitionKey) -> Result<bool, PersistenceError> {
        Ok(self.tables.lock().partitions.contains(&key))
    }

    async fn create_partition(&self, key: PartitionKey) -> Result<bool, PersistenceError> {
        if let Some(error) = self.partition_failures.lock().pop_front() {
            return Err(error);
        }
        let created = self.tables.lock().partitions.insert(key);
        if created {
            self.partition_creations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(created)
    }

    async fn insert_chunk(
        &self,
        rows: &[PersistableRow],
        _options: &TransactionOptions,
    ) -> Result<u64, PersistenceError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected.lock().pop_front() {
            return Err(error);
        }

        let mut tables = self.tables.lock();
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            match tables.insert(row) {
                Ok(key) => inserted.push(key),
                Err(e) => {
                    for key in inserted.into_iter().rev() {
                        tables.undo(key);
                    }
                    return Err(e);
                },
            }
        }
        Ok(inserted.len() as u64)
    }
}

#[async_trait]
impl CardLookup for MemoryStore {
    async fn find_card(&self, card_number: &str) -> Result<Option<CardRef>, PersistenceError> {
        let tables = self.tables.lock();
        Ok(tables.cards.get(card_number).map(|card| CardRef {
            card_number: card.card_number.clone(),
            account_id: card.account_id.clone(),
            active: card.active,
            customer_id: tables
                .card_xrefs
                .get(card_number)
                .map(|xref| xref.customer_id.clone()),
        }))
    }
}

#[async_trait]
impl AccountLookup for MemoryStore {
    async fn find_account(&self, account_id: &str) -> Result<Option<AccountRef>, PersistenceError> {
        Ok(self.tables.lock().accounts.get(account_id).map(|a| AccountRef {
            account_id: a.account_id.clone(),
            active: a.active,
        }))
    }
}

#[async_trait]
impl ReferenceCodeLookup for MemoryStore {
    async fn transaction_type_exists(&self, type_code: &str) -> Result<bool, PersistenceError> {
        Ok(self.tables.lock().transaction_types.contains_key(type_code))
    }

    async fn transaction_category_exists(
        &self,
        type_code: &str,
        category_code: &str,
    ) -> Result<bool, PersistenceError> {
        let key = (type_code.to_string(), category_code.to_string());
        Ok(self.tables.lock().transaction_categories.contains_key(&key))
    }
}

#[async_trait]
impl JobLedger for MemoryStore {
    async fn start_job(&self, job_name: &str) -> Result<Uuid, PersistenceError> {
        let id = Uuid::new_v4();
        self.jobs.lock().insert(
            id,
            JobEntry {
                id,
                job_name: job_name.to_string(),
                status: JobStatus::Running,
                summary: BatchSummary::default(),
                error: None,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        Ok(id)
    }

    async fn record_skips(
        &self,
        job_id: Uuid,
        outcomes: &[ValidationOutcome],
    ) -> Result<(), PersistenceError> {
        self.skips
            .lock()
            .extend(outcomes.iter().map(|outcome| (job_id, outcome.clone())));
        Ok(())
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        summary: &BatchSummary,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(&job_id)
            .ok_or_else(|| PersistenceError::Fatal(format!("unknown job {}", job_id)))?;
        entry.status = status;
        entry.summary = *summary;
        entry.error = error.map(str::to_string);
        entry.finished_at = Some(Utc::now());
        Ok(())
    }
}
