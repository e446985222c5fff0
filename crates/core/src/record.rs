//! Persisted job record and status.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::DatarunId;

/// Datarun execution status as stored by the job repository.
///
/// Only `Pending` is ever written by the supervisor. `Running`, `Complete` and
/// `Error` are owned by the worker computation itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker
    Pending,
    /// A worker has picked the datarun up
    Running,
    /// Finished successfully
    Complete,
    /// Finished with an error
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "error" | "errored" => Ok(JobStatus::Error),
            other => Err(DomainError::invalid_status(other)),
        }
    }
}

/// The slice of a datarun row the supervisor cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: DatarunId,
    pub status: JobStatus,
    pub end_time: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a fresh pending record.
    pub fn pending(id: DatarunId) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            end_time: None,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Return the datarun to the pending pool after its worker went away.
    pub fn mark_pending(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.end_time = Some(at);
    }
}
