//! Legacy record ingestion
//!
//! Stages, leaves first:
//!
//! - [`layout`] / [`decoder`]: fixed-width slicing
//! - [`decimal`]: legacy scaled-decimal codec
//! - [`validation`]: field checks and typed record assembly
//! - [`reference`] / [`resolver`]: code tables and card → account → customer
//! - [`loader`]: partition-aware, retrying chunk loads
//! - [`pipeline`] / [`orchestrator`]: chunk scheduling and job phases
//!
//! [`storage::PgStore`] and [`memory::MemoryStore`] implement every port.

pub mod decimal;
pub mod decoder;
pub mod jobs;
pub mod layout;
pub mod loader;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod reference;
pub mod resolver;
pub mod storage;
pub mod validation;

pub use decimal::{CodecConfig, DecimalCodec, RoundingMode, SignConvention};
pub use decoder::{decode, RawRecord};
pub use layout::{layout_for, FieldSpec, RecordLayout};
pub use loader::{BulkLoader, ChunkStore, PartitionKey, RetryPolicy};
pub use models::{PersistableRow, RecordRef, RecordState};
pub use orchestrator::{JobInputs, JobPorts, JobReport, MigrationJob};
pub use pipeline::{BatchResult, BatchSummary};
