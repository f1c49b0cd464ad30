//! Job ledger: execution metadata of migration runs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::ValidationOutcome;
use super::pipeline::BatchSummary;
use crate::error::PersistenceError;

/// Migration job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Where job runs and their skipped records are recorded
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Register a running job
    async fn start_job(&self, job_name: &str) -> Result<Uuid, PersistenceError>;

    /// Append skip audit entries
    async fn record_skips(
        &self,
        job_id: Uuid,
        outcomes: &[ValidationOutcome],
    ) -> Result<(), PersistenceError>;

    /// Store final counters and status
    async fn finish_job(
        &self,
        job_id: Uuid,
        summary: &BatchSummary,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), PersistenceError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }
}
