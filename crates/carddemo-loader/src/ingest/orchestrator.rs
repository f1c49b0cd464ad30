//! Migration job orchestrator
//!
//! Runs one pipeline phase per record type in dependency order:
//! transaction types, categories, accounts, cards, card cross-reference,
//! transactions. A phase starts only after the previous one has committed,
//! so the per-phase lookup caches never see a half-loaded table.
//!
//! A fatal error or cancellation stops the job after in-flight chunks
//! drain. Either way the ledger receives the final counters and status.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use carddemo_common::RecordType;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::jobs::{JobLedger, JobStatus};
use super::loader::{BulkLoader, ChunkStore};
use super::models::ValidationOutcome;
use super::pipeline::{
    BatchResult, BatchSummary, FailurePoint, Pipeline, PipelineOptions, StageContext,
};
use super::reference::{ReferenceCodeCache, ReferenceCodeLookup};
use super::resolver::{AccountLookup, CardLookup, CrossReferenceResolver};
use super::validation::ValidationContext;
use crate::config::Config;
use crate::error::PipelineError;

/// Input file per record type; absent types are skipped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInputs {
    files: BTreeMap<RecordType, PathBuf>,
}

impl JobInputs {
    pub fn with(mut self, record_type: RecordType, path: impl Into<PathBuf>) -> Self {
        self.files.insert(record_type, path.into());
        self
    }

    pub fn with_transaction_types(self, path: impl Into<PathBuf>) -> Self {
        self.with(RecordType::TransactionType, path)
    }

    pub fn with_transaction_categories(self, path: impl Into<PathBuf>) -> Self {
        self.with(RecordType::TransactionCategory, path)
    }

    pub fn with_accounts(self, path: impl Into<PathBuf>) -> Self {
        self.with(RecordType::Account, path)
    }

    pub fn with_cards(self, path: impl Into<PathBuf>) -> Self {
        self.with(RecordType::Card, path)
    }

    pub fn with_card_xrefs(self, path: impl Into<PathBuf>) -> Self {
        self.with(RecordType::CardXref, path)
    }

    pub fn with_transactions(self, path: impl Into<PathBuf>) -> Self {
        self.with(RecordType::Transaction, path)
    }

    pub fn path(&self, record_type: RecordType) -> Option<&Path> {
        self.files.get(&record_type).map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Persistence ports a job runs against
#[derive(Clone)]
pub struct JobPorts {
    pub store: Arc<dyn ChunkStore>,
    pub cards: Arc<dyn CardLookup>,
    pub accounts: Arc<dyn AccountLookup>,
    pub codes: Arc<dyn ReferenceCodeLookup>,
    pub ledger: Arc<dyn JobLedger>,
}

impl JobPorts {
    /// Every port served by one store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ChunkStore + CardLookup + AccountLookup + ReferenceCodeLookup + JobLedger + 'static,
    {
        Self {
            store: store.clone(),
            cards: store.clone(),
            accounts: store.clone(),
            codes: store.clone(),
            ledger: store,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub record_type: RecordType,
    pub chunks: usize,
    pub loaded: u64,
    pub skipped: u64,
}

/// Final outcome of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub job_name: String,
    pub status: JobStatus,
    pub summary: BatchSummary,
    pub phases: Vec<PhaseSummary>,
    /// Capped; the job ledger holds every skip
    pub skip_reasons: Vec<ValidationOutcome>,
    pub failure_point: Option<FailurePoint>,
    pub duration_secs: f64,
}

pub struct MigrationJob {
    ports: JobPorts,
    loader: Arc<BulkLoader>,
    validation: ValidationContext,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl MigrationJob {
    pub fn new(ports: JobPorts, config: &Config) -> anyhow::Result<Self> {
        let today = Utc::now().date_naive();
        let loader = Arc::new(BulkLoader::new(
            ports.store.clone(),
            config.retry_policy(),
            config.transaction_options(),
        ));

        Ok(Self {
            ports,
            loader,
            validation: config.validation_context(today)?,
            options: config.pipeline,
            cancel: CancellationToken::new(),
        })
    }

    pub fn from_store<S>(store: Arc<S>, config: &Config) -> anyhow::Result<Self>
    where
        S: ChunkStore + CardLookup + AccountLookup + ReferenceCodeLookup + JobLedger + 'static,
    {
        Self::new(JobPorts::from_store(store), config)
    }

    /// Evaluate date rules as of `today` instead of the current date
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.validation.today = today;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Cancelling the token stops the job after in-flight chunks finish
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fresh caches per phase; the loader and its partition set live for the job
    fn stage_context(&self) -> StageContext {
        StageContext {
            validation: self.validation.clone(),
            codes: ReferenceCodeCache::new(self.ports.codes.clone()),
            resolver: CrossReferenceResolver::new(
                self.ports.cards.clone(),
                self.ports.accounts.clone(),
            ),
            loader: Arc::clone(&self.loader),
        }
    }

    pub async fn run(&self, job_name: &str, inputs: &JobInputs) -> Result<JobReport, PipelineError> {
        let start_time = Instant::now();
        let job_id = self.ports.ledger.start_job(job_name).await?;

        info!(
            %job_id,
            job_name,
            chunk_size = self.options.chunk_size,
            workers = self.options.workers,
            "Starting migration job"
        );

        let batch = Arc::new(BatchResult::new());
        let mut phases = Vec::new();
        let mut skip_reasons: Vec<ValidationOutcome> = Vec::new();
        let mut failure_point = None;
        let mut cancelled = false;

        for record_type in RecordType::LOAD_ORDER {
            let Some(path) = inputs.path(record_type) else {
                debug!(record_type = %record_type, "No input file, phase skipped");
                continue;
            };

            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            info!(record_type = %record_type, path = %path.display(), "Starting phase");

            let pipeline = Pipeline::new(
                record_type,
                Arc::new(self.stage_context()),
                self.options,
                self.cancel.clone(),
            )
            .with_audit(self.ports.ledger.clone(), job_id);

            let phase = match pipeline.run_file(path, &batch).await {
                Ok(phase) => phase,
                Err(e) => {
                    error!(record_type = %record_type, error = %e, "Phase could not start");
                    failure_point = Some(FailurePoint {
                        record_type,
                        chunk: None,
                        first_line: None,
                        last_line: None,
                        error: e.to_string(),
                    });
                    break;
                },
            };

            info!(
                record_type = %record_type,
                chunks = phase.chunks,
                loaded = phase.loaded,
                skipped = phase.skipped,
                "Phase finished"
            );

            phases.push(PhaseSummary {
                record_type,
                chunks: phase.chunks,
                loaded: phase.loaded,
                skipped: phase.skipped,
            });

            let room = self
                .options
                .max_skip_reasons
                .saturating_sub(skip_reasons.len());
            skip_reasons.extend(phase.skip_reasons.into_iter().take(room));

            if phase.failure.is_some() {
                failure_point = phase.failure;
                break;
            }
            if phase.cancelled {
                cancelled = true;
                break;
            }
        }

        let status = match (&failure_point, cancelled) {
            (Some(_), _) => JobStatus::Failed,
            (None, true) => JobStatus::Cancelled,
            (None, false) => JobStatus::Completed,
        };
        let summary = batch.snapshot();
        let error_message = failure_point.as_ref().map(|f| f.to_string());

        self.ports
            .ledger
            .finish_job(job_id, &summary, status, error_message.as_deref())
            .await?;

        let duration = start_time.elapsed();
        match status {
            JobStatus::Failed => error!(
                %job_id,
                failure = error_message.as_deref().unwrap_or_default(),
                total_seen = summary.total_seen,
                succeeded = summary.succeeded,
                skipped = summary.skipped,
                failed_fatal = summary.failed_fatal,
                "Migration job failed"
            ),
            JobStatus::Cancelled => warn!(
                %job_id,
                total_seen = summary.total_seen,
                succeeded = summary.succeeded,
                "Migration job cancelled"
            ),
            _ => info!(
                %job_id,
                total_seen = summary.total_seen,
                succeeded = summary.succeeded,
                skipped = summary.skipped,
                "Migration job complete in {:.2}s",
                duration.as_secs_f64()
            ),
        }

        Ok(JobReport {
            job_id,
            job_name: job_name.to_string(),
            status,
            summary,
            phases,
            skip_reasons,
            failure_point,
            duration_secs: duration.as_secs_f64(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::memory::MemoryStore;

    #[test]
    fn test_inputs_builder() {
        let inputs = JobInputs::default()
            .with_cards("cards.txt")
            .with_accounts("accounts.txt");
        assert_eq!(inputs.path(RecordType::Card), Some(Path::new("cards.txt")));
        assert!(inputs.path(RecordType::Transaction).is_none());
        assert!(!inputs.is_empty());
    }

    #[tokio::test]
    async fn test_empty_job_completes() {
        let store = Arc::new(MemoryStore::new());
        let job = MigrationJob::from_store(store.clone(), &Config::default()).unwrap();

        let report = job.run("empty", &JobInputs::default()).await.unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.summary, BatchSummary::default());
        assert_eq!(store.jobs()[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_file_fails_job() {
        let store = Arc::new(MemoryStore::new());
        let job = MigrationJob::from_store(store.clone(), &Config::default()).unwrap();
        let inputs = JobInputs::default().with_accounts("/nonexistent/acctdata.txt");

        let report = job.run("missing", &inputs).await.unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        let failure = report.failure_point.unwrap();
        assert_eq!(failure.record_type, RecordType::Account);
        assert!(failure.error.contains("acctdata.txt"));
        assert_eq!(store.jobs()[0].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MemoryStore::new());
        let job = MigrationJob::from_store(store.clone(), &Config::default()).unwrap();
        job.cancellation_token().cancel();

        let inputs = JobInputs::default().with_accounts("/nonexistent/acctdata.txt");
        let report = job.run("cancelled", &inputs).await.unwrap();
        assert_eq!(report.status, JobStatus::Cancelled);
        assert!(report.failure_point.is_none());
    }
}
