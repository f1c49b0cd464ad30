//! Partition-aware bulk loader
//!
//! A chunk is the unit of atomicity: every row of a chunk commits in one
//! transaction or none does. Before inserting, the loader makes sure the
//! monthly partition of every transaction row exists. Transient failures
//! (serialization conflicts, deadlocks, timeouts) retry the whole chunk with
//! exponential backoff.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::models::PersistableRow;
use crate::error::{LoadError, PersistenceError};

/// Parent table of the monthly partitions
pub const TRANSACTIONS_TABLE: &str = "transactions";

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Calendar month identifying one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
}

impl PartitionKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn from_timestamp(ts: &NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    /// First day of the month (inclusive bound)
    pub fn lower_bound(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// First day of the next month (exclusive bound)
    pub fn upper_bound(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MAX)
    }

    /// Partition table name, e.g. `transactions_2024_03`
    pub fn table_name(&self) -> String {
        format!("{}_{:04}_{:02}", TRANSACTIONS_TABLE, self.year, self.month)
    }

    /// Stable number used as the advisory lock key
    pub fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    Serializable,
    RepeatableRead,
    ReadCommitted,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
        }
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '-'], "_").as_str() {
            "serializable" => Ok(IsolationLevel::Serializable),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}

/// Transactional boundary settings for one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    pub timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_inserted: u64,
    pub attempts: u32,
    pub partitions_created: Vec<PartitionKey>,
}

/// Persistence port used by the loader
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn partition_exists(&self, key: PartitionKey) -> Result<bool, PersistenceError>;

    /// Create the partition if absent; `Ok(true)` only for the call that created it
    async fn create_partition(&self, key: PartitionKey) -> Result<bool, PersistenceError>;

    /// Insert every row in one transaction, returning the number inserted
    async fn insert_chunk(
        &self,
        rows: &[PersistableRow],
        options: &TransactionOptions,
    ) -> Result<u64, PersistenceError>;
}

pub struct BulkLoader {
    store: Arc<dyn ChunkStore>,
    policy: RetryPolicy,
    options: TransactionOptions,
    known_partitions: Mutex<HashSet<PartitionKey>>,
}

impl BulkLoader {
    pub fn new(store: Arc<dyn ChunkStore>, policy: RetryPolicy, options: TransactionOptions) -> Self {
        Self {
            store,
            policy,
            options,
            known_partitions: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Load one chunk atomically
    pub async fn load_chunk(&self, rows: &[PersistableRow]) -> Result<LoadReport, LoadError> {
        if rows.is_empty() {
            return Ok(LoadReport::default());
        }

        let keys: BTreeSet<PartitionKey> = rows.iter().filter_map(|r| r.partition_key()).collect();
        let partitions_created = self.ensure_partitions(&keys).await?;

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome =
                tokio::time::timeout(self.options.timeout, self.store.insert_chunk(rows, &self.options))
                    .await;

            let failure = match outcome {
                Ok(Ok(inserted)) => {
                    debug!(rows = inserted, attempt, "Chunk committed");
                    return Ok(LoadReport {
                        rows_inserted: inserted,
                        attempts: attempt,
                        partitions_created,
                    });
                },
                Ok(Err(PersistenceError::Transient(message))) => message,
                Err(_) => format!("chunk transaction exceeded {:?}", self.options.timeout),
                Ok(Err(PersistenceError::Constraint(message))) => {
                    return Err(LoadError::Rejected(message));
                },
                Ok(Err(PersistenceError::Fatal(message))) => {
                    return Err(LoadError::Fatal(message));
                },
            };

            warn!(
                attempt,
                max_attempts,
                rows = rows.len(),
                error = %failure,
                "Transient chunk failure"
            );
            last_error = failure;

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        Err(LoadError::RetriesExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Create missing partitions; serialized so each month is created once per process
    async fn ensure_partitions(
        &self,
        keys: &BTreeSet<PartitionKey>,
    ) -> Result<Vec<PartitionKey>, LoadError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut known = self.known_partitions.lock().await;
        let missing: Vec<PartitionKey> = keys
            .iter()
            .filter(|k| !known.contains(*k))
            .copied()
            .collect();
        let mut created = Vec::new();

        for key in missing {
            let partition_error = |e: PersistenceError| LoadError::Partition {
                partition: key.to_string(),
                message: e.to_string(),
            };

            if !self.store.partition_exists(key).await.map_err(partition_error)? {
                if self.store.create_partition(key).await.map_err(partition_error)? {
                    info!(partition = %key, table = %key.table_name(), "Created partition");
                    created.push(key);
                }
            }
            known.insert(key);
        }

        Ok(created)
    }
}
