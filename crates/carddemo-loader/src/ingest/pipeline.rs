//! Chunked record pipeline
//!
//! Lines are grouped into chunks and each chunk runs through the fixed
//! stage sequence decode → validate → resolve → load. Up to `workers`
//! chunks are in flight at once (`buffer_unordered`), the pattern the
//! division loaders use for parallel downloads.
//!
//! Counters live in an explicit [`BatchResult`] passed in by the caller and
//! are only touched through atomic increments.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use carddemo_common::RecordType;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::decoder::{decode, RawRecord};
use super::jobs::JobLedger;
use super::loader::BulkLoader;
use super::models::{
    DomainRecord, PersistableRow, RecordRef, RecordState, ResolvedTransaction, Stage,
    ValidationOutcome,
};
use super::reference::ReferenceCodeCache;
use super::resolver::{CrossReferenceResolver, ReferenceFailure};
use super::validation::{
    check_reference_codes, outcome_from_violations, validate_record, ValidationContext,
};
use crate::error::{ErrorCategory, LoadError, PipelineError};

/// Default number of lines per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default number of chunks processed concurrently
pub const DEFAULT_WORKERS: usize = 4;

/// Default cap on skip reasons kept in memory per job
pub const DEFAULT_MAX_SKIP_REASONS: usize = 1000;

// ============================================================================
// Counters
// ============================================================================

/// Live job counters
#[derive(Debug, Default)]
pub struct BatchResult {
    total_seen: AtomicU64,
    succeeded: AtomicU64,
    skipped: AtomicU64,
    failed_fatal: AtomicU64,
    format: AtomicU64,
    validation: AtomicU64,
    reference: AtomicU64,
    rejected: AtomicU64,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn record_seen(&self, n: u64) {
        self.total_seen.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_loaded(&self, n: u64) {
        self.succeeded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, category: ErrorCategory) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        let counter = match category {
            ErrorCategory::Format => &self.format,
            ErrorCategory::Validation => &self.validation,
            ErrorCategory::Reference => &self.reference,
            ErrorCategory::Rejected => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fatal(&self, n: u64) {
        self.failed_fatal.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BatchSummary {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        BatchSummary {
            total_seen: get(&self.total_seen),
            succeeded: get(&self.succeeded),
            skipped: get(&self.skipped),
            failed_fatal: get(&self.failed_fatal),
            skipped_by_category: SkipCounts {
                format: get(&self.format),
                validation: get(&self.validation),
                reference: get(&self.reference),
                rejected: get(&self.rejected),
            },
        }
    }

    fn counters(&self) -> [&AtomicU64; 8] {
        [
            &self.total_seen,
            &self.succeeded,
            &self.skipped,
            &self.failed_fatal,
            &self.format,
            &self.validation,
            &self.reference,
            &self.rejected,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub format: u64,
    pub validation: u64,
    pub reference: u64,
    pub rejected: u64,
}

/// Point-in-time copy of a [`BatchResult`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_seen: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed_fatal: u64,
    pub skipped_by_category: SkipCounts,
}

// ============================================================================
// Stages
// ============================================================================

/// One non-blank input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-based, counting blank lines
    pub line_number: u64,
    pub text: String,
}

/// Shared, read-mostly state of one job phase
pub struct StageContext {
    pub validation: ValidationContext,
    pub codes: ReferenceCodeCache,
    pub resolver: CrossReferenceResolver,
    pub loader: Arc<BulkLoader>,
}

/// Why a record left the pipeline early
#[derive(Debug)]
pub enum RecordFailure {
    Skip(ValidationOutcome),
    Fatal(LoadError),
}

fn record_ref(raw: &RawRecord) -> RecordRef {
    RecordRef {
        record_type: raw.record_type,
        line_number: raw.line_number,
        key: raw
            .fields()
            .next()
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty()),
    }
}

fn reference_skip(record_ref: RecordRef, reason: ReferenceFailure) -> RecordFailure {
    RecordFailure::Skip(ValidationOutcome {
        record_ref,
        stage: Stage::Resolve,
        category: ErrorCategory::Reference,
        error_kind: reason.as_str().to_string(),
        message: reason.to_string(),
    })
}

fn lookup_failure(err: impl std::fmt::Display) -> RecordFailure {
    RecordFailure::Fatal(LoadError::Lookup(err.to_string()))
}

/// Stage 1: slice the line
pub fn decode_stage(
    line: &SourceLine,
    record_type: RecordType,
) -> Result<RawRecord, ValidationOutcome> {
    decode(&line.text, record_type, line.line_number).map_err(|e| ValidationOutcome {
        record_ref: RecordRef {
            record_type,
            line_number: line.line_number,
            key: None,
        },
        stage: Stage::Decode,
        category: ErrorCategory::Format,
        error_kind: e.kind().as_str().to_string(),
        message: e.to_string(),
    })
}

/// Stage 2: typed record, field rules and code-table membership
pub async fn validate_stage(
    raw: &RawRecord,
    ctx: &StageContext,
) -> Result<DomainRecord, RecordFailure> {
    let record = validate_record(raw, &ctx.validation).map_err(|violations| {
        RecordFailure::Skip(outcome_from_violations(record_ref(raw), Stage::Validate, &violations))
    })?;

    if let DomainRecord::Transaction(txn) = &record {
        let violations = check_reference_codes(txn, &ctx.codes)
            .await
            .map_err(lookup_failure)?;
        if !violations.is_empty() {
            return Err(RecordFailure::Skip(outcome_from_violations(
                record_ref(raw),
                Stage::Validate,
                &violations,
            )));
        }
    }

    Ok(record)
}

/// Stage 3: attach foreign keys, rejecting dangling references
pub async fn resolve_stage(
    record: DomainRecord,
    record_ref: RecordRef,
    ctx: &StageContext,
) -> Result<PersistableRow, RecordFailure> {
    let resolver = &ctx.resolver;
    match record {
        DomainRecord::TransactionType(r) => Ok(PersistableRow::TransactionType(r)),
        DomainRecord::TransactionCategory(r) => Ok(PersistableRow::TransactionCategory(r)),
        DomainRecord::Account(r) => Ok(PersistableRow::Account(r)),
        DomainRecord::Card(card) => {
            if resolver
                .find_account(&card.account_id)
                .await
                .map_err(lookup_failure)?
                .is_none()
            {
                return Err(reference_skip(record_ref, ReferenceFailure::AccountNotFound));
            }
            Ok(PersistableRow::Card(card))
        },
        DomainRecord::CardXref(xref) => {
            if resolver
                .find_card(&xref.card_number)
                .await
                .map_err(lookup_failure)?
                .is_none()
            {
                return Err(reference_skip(record_ref, ReferenceFailure::CardNotFound));
            }
            if resolver
                .find_account(&xref.account_id)
                .await
                .map_err(lookup_failure)?
                .is_none()
            {
                return Err(reference_skip(record_ref, ReferenceFailure::AccountNotFound));
            }
            Ok(PersistableRow::CardXref(xref))
        },
        DomainRecord::Transaction(txn) => {
            let result = resolver
                .resolve(&txn.card_number)
                .await
                .map_err(lookup_failure)?;
            match (result.account_id, result.reason) {
                (Some(account_id), None) if result.valid => {
                    Ok(PersistableRow::Transaction(ResolvedTransaction {
                        record: txn,
                        account_id,
                        customer_id: result.customer_id,
                    }))
                },
                (_, reason) => Err(reference_skip(
                    record_ref,
                    reason.unwrap_or(ReferenceFailure::CardNotFound),
                )),
            }
        },
    }
}

/// Stages 1-3 for one line, advancing `state` as each stage passes
async fn prepare_record(
    line: &SourceLine,
    record_type: RecordType,
    ctx: &StageContext,
    state: &mut RecordState,
) -> Result<(RecordRef, PersistableRow), RecordFailure> {
    let raw = decode_stage(line, record_type).map_err(RecordFailure::Skip)?;
    *state = RecordState::Decoded;

    let record = validate_stage(&raw, ctx).await?;
    *state = RecordState::Validated;

    let reference = RecordRef {
        record_type,
        line_number: line.line_number,
        key: Some(record.key()),
    };
    let row = resolve_stage(record, reference.clone(), ctx).await?;
    *state = RecordState::Resolved;

    Ok((reference, row))
}

// ============================================================================
// Chunks
// ============================================================================

#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based position in the input
    pub index: usize,
    pub record_type: RecordType,
    pub lines: Vec<SourceLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub line_number: u64,
    pub state: RecordState,
}

#[derive(Debug)]
pub struct ChunkReport {
    pub index: usize,
    pub record_type: RecordType,
    pub first_line: u64,
    pub last_line: u64,
    pub records: Vec<RecordOutcome>,
    pub skips: Vec<ValidationOutcome>,
    pub loaded: u64,
    pub fatal: Option<LoadError>,
}

impl ChunkReport {
    fn new(chunk: &Chunk) -> Self {
        Self {
            index: chunk.index,
            record_type: chunk.record_type,
            first_line: chunk.lines.first().map(|l| l.line_number).unwrap_or(0),
            last_line: chunk.lines.last().map(|l| l.line_number).unwrap_or(0),
            records: chunk
                .lines
                .iter()
                .map(|line| RecordOutcome {
                    line_number: line.line_number,
                    state: RecordState::Pending,
                })
                .collect(),
            skips: Vec::new(),
            loaded: 0,
            fatal: None,
        }
    }

    fn skip(&mut self, slot: usize, outcome: ValidationOutcome, batch: &BatchResult) {
        self.records[slot].state = RecordState::Skipped {
            stage: outcome.stage,
            category: outcome.category,
        };
        batch.record_skipped(outcome.category);
        self.skips.push(outcome);
    }

    /// Every undecided record of the chunk becomes `FailedFatal`
    fn fail(mut self, err: LoadError, batch: &BatchResult) -> Self {
        let mut failed = 0;
        for record in self.records.iter_mut().filter(|r| !r.state.is_terminal()) {
            record.state = RecordState::FailedFatal;
            failed += 1;
        }
        batch.record_fatal(failed);
        error!(
            record_type = %self.record_type,
            chunk = self.index,
            first_line = self.first_line,
            last_line = self.last_line,
            error = %err,
            "Chunk failed"
        );
        self.fatal = Some(err);
        self
    }
}

/// Run one chunk through every stage
pub async fn process_chunk(chunk: Chunk, ctx: &StageContext, batch: &BatchResult) -> ChunkReport {
    let mut report = ChunkReport::new(&chunk);
    batch.record_seen(chunk.lines.len() as u64);

    let mut refs = Vec::with_capacity(chunk.lines.len());
    let mut rows = Vec::with_capacity(chunk.lines.len());

    for (slot, line) in chunk.lines.iter().enumerate() {
        let mut state = RecordState::Pending;
        let prepared = prepare_record(line, chunk.record_type, ctx, &mut state).await;
        report.records[slot].state = state;

        match prepared {
            Ok((reference, row)) => {
                refs.push((slot, reference));
                rows.push(row);
            },
            Err(RecordFailure::Skip(outcome)) => {
                debug!(record = %outcome.record_ref, reason = %outcome.message, "Record skipped");
                report.skip(slot, outcome, batch);
            },
            Err(RecordFailure::Fatal(err)) => return report.fail(err, batch),
        }
    }

    match ctx.loader.load_chunk(&rows).await {
        Ok(load) => {
            for (slot, _) in &refs {
                report.records[*slot].state = RecordState::Loaded;
            }
            report.loaded = refs.len() as u64;
            batch.record_loaded(report.loaded);
            debug!(
                record_type = %chunk.record_type,
                chunk = chunk.index,
                loaded = report.loaded,
                skipped = report.skips.len(),
                attempts = load.attempts,
                "Chunk processed"
            );
        },
        Err(LoadError::Rejected(message)) => {
            warn!(
                record_type = %chunk.record_type,
                chunk = chunk.index,
                rows = refs.len(),
                error = %message,
                "Chunk rejected by constraint, rows skipped"
            );
            for (slot, reference) in refs {
                let outcome = ValidationOutcome {
                    record_ref: reference,
                    stage: Stage::Load,
                    category: ErrorCategory::Rejected,
                    error_kind: "constraint".to_string(),
                    message: message.clone(),
                };
                report.skip(slot, outcome, batch);
            }
        },
        Err(err) => return report.fail(err, batch),
    }

    report
}

// ============================================================================
// Phase runner
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub workers: usize,
    pub max_skip_reasons: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            max_skip_reasons: DEFAULT_MAX_SKIP_REASONS,
        }
    }
}

/// Where a job stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePoint {
    pub record_type: RecordType,
    pub chunk: Option<usize>,
    pub first_line: Option<u64>,
    pub last_line: Option<u64>,
    pub error: String,
}

impl std::fmt::Display for FailurePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.record_type)?;
        if let Some(chunk) = self.chunk {
            write!(f, " chunk {}", chunk)?;
        }
        if let (Some(first), Some(last)) = (self.first_line, self.last_line) {
            write!(f, " (lines {}-{})", first, last)?;
        }
        write!(f, ": {}", self.error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub record_type: RecordType,
    pub chunks: usize,
    pub loaded: u64,
    pub skipped: u64,
    /// First `max_skip_reasons` skips; the ledger holds all of them
    pub skip_reasons: Vec<ValidationOutcome>,
    pub failure: Option<FailurePoint>,
    pub cancelled: bool,
}

impl PhaseReport {
    fn new(record_type: RecordType) -> Self {
        Self {
            record_type,
            chunks: 0,
            loaded: 0,
            skipped: 0,
            skip_reasons: Vec::new(),
            failure: None,
            cancelled: false,
        }
    }
}

/// Runs one record type's input through the stages
pub struct Pipeline {
    record_type: RecordType,
    ctx: Arc<StageContext>,
    options: PipelineOptions,
    cancel: CancellationToken,
    audit: Option<(Arc<dyn JobLedger>, Uuid)>,
}

impl Pipeline {
    pub fn new(
        record_type: RecordType,
        ctx: Arc<StageContext>,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            record_type,
            ctx,
            options,
            cancel,
            audit: None,
        }
    }

    /// Record skips of every chunk in the job ledger
    pub fn with_audit(mut self, ledger: Arc<dyn JobLedger>, job_id: Uuid) -> Self {
        self.audit = Some((ledger, job_id));
        self
    }

    pub async fn run_file(
        &self,
        path: &Path,
        batch: &Arc<BatchResult>,
    ) -> Result<PhaseReport, PipelineError> {
        let file = File::open(path).await.map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let lines = LinesStream::new(BufReader::new(file).lines());
        Ok(self.run_lines(lines, batch).await)
    }

    /// Drive a line stream through the stages until exhausted, cancelled or failed
    pub async fn run_lines<S>(&self, lines: S, batch: &Arc<BatchResult>) -> PhaseReport
    where
        S: Stream<Item = std::io::Result<String>>,
    {
        let record_type = self.record_type;
        let stop = self.cancel.child_token();

        let chunks = lines
            .enumerate()
            .filter_map(|(index, line)| {
                let item = match line {
                    Ok(text) => {
                        let text = text.trim_end_matches('\r');
                        (!text.trim().is_empty()).then(|| {
                            Ok(SourceLine {
                                line_number: index as u64 + 1,
                                text: text.to_string(),
                            })
                        })
                    },
                    Err(e) => Some(Err(e)),
                };
                futures::future::ready(item)
            })
            .chunks(self.options.chunk_size.max(1))
            .enumerate()
            .take_until(stop.cancelled());

        let reports = chunks
            .map(|(index, items)| {
                let ctx = Arc::clone(&self.ctx);
                let batch = Arc::clone(batch);
                async move {
                    let lines = items.into_iter().collect::<std::io::Result<Vec<_>>>()?;
                    let chunk = Chunk {
                        index,
                        record_type,
                        lines,
                    };
                    Ok::<_, std::io::Error>(process_chunk(chunk, &ctx, &batch).await)
                }
            })
            .buffer_unordered(self.options.workers.max(1));
        let mut reports = std::pin::pin!(reports);

        let mut phase = PhaseReport::new(record_type);

        while let Some(result) = reports.next().await {
            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    error!(record_type = %record_type, error = %e, "Failed to read input");
                    phase.failure.get_or_insert(FailurePoint {
                        record_type,
                        chunk: None,
                        first_line: None,
                        last_line: None,
                        error: format!("failed to read input: {}", e),
                    });
                    stop.cancel();
                    continue;
                },
            };

            phase.chunks += 1;
            phase.loaded += report.loaded;
            phase.skipped += report.skips.len() as u64;

            if !report.skips.is_empty() {
                if let Some((ledger, job_id)) = &self.audit {
                    if let Err(e) = ledger.record_skips(*job_id, &report.skips).await {
                        error!(error = %e, "Failed to record skipped records");
                        phase.failure.get_or_insert(FailurePoint {
                            record_type,
                            chunk: Some(report.index),
                            first_line: Some(report.first_line),
                            last_line: Some(report.last_line),
                            error: format!("job ledger error: {}", e),
                        });
                        stop.cancel();
                    }
                }
                let room = self
                    .options
                    .max_skip_reasons
                    .saturating_sub(phase.skip_reasons.len());
                phase.skip_reasons.extend(report.skips.into_iter().take(room));
            }

            if let Some(err) = report.fatal {
                phase.failure.get_or_insert(FailurePoint {
                    record_type,
                    chunk: Some(report.index),
                    first_line: Some(report.first_line),
                    last_line: Some(report.last_line),
                    error: err.to_string(),
                });
                stop.cancel();
            }
        }

        phase.cancelled = phase.failure.is_none() && self.cancel.is_cancelled();
        phase
    }
}

// ============================================================================
// Validation-only run
// ============================================================================

/// Result of checking a file without touching any store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub record_type: RecordType,
    pub summary: BatchSummary,
    pub skip_reasons: Vec<ValidationOutcome>,
}

/// Decode and validate every line of `path`; no lookups, no writes
pub async fn check_file(
    path: &Path,
    record_type: RecordType,
    validation: &ValidationContext,
    max_skip_reasons: usize,
) -> Result<CheckReport, PipelineError> {
    let io_error = |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).await.map_err(io_error)?;
    let mut lines = BufReader::new(file).lines();

    let batch = BatchResult::new();
    let mut skip_reasons = Vec::new();
    let mut line_number = 0u64;

    while let Some(text) = lines.next_line().await.map_err(io_error)? {
        line_number += 1;
        let text = text.trim_end_matches('\r');
        if text.trim().is_empty() {
            continue;
        }
        batch.record_seen(1);

        let line = SourceLine {
            line_number,
            text: text.to_string(),
        };
        let outcome = decode_stage(&line, record_type).and_then(|raw| {
            validate_record(&raw, validation)
                .map(|_| ())
                .map_err(|violations| {
                    outcome_from_violations(record_ref(&raw), Stage::Validate, &violations)
                })
        });

        match outcome {
            Ok(()) => batch.record_loaded(1),
            Err(outcome) => {
                batch.record_skipped(outcome.category);
                if skip_reasons.len() < max_skip_reasons {
                    skip_reasons.push(outcome);
                }
            },
        }
    }

    Ok(CheckReport {
        record_type,
        summary: batch.snapshot(),
        skip_reasons,
    })
}

/// Chunk lines of an in-memory input; used by tests and fixtures
pub fn lines_stream<I>(lines: I) -> impl Stream<Item = std::io::Result<String>>
where
    I: IntoIterator<Item = String>,
{
    stream::iter(lines.into_iter().map(Ok))
}
