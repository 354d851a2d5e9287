pub mod pool;

pub use pool::{QueueStatus, WorkerPool};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobType {
    Invalid,
    BmcPower,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Default,
    Queued,
    InProgress,
    Complete,
    Cancelled,
    Error,
}

impl JobStatus {
    /// Still waiting for a worker
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, JobStatus::Default | JobStatus::Queued)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Default => "default",
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in-progress",
            JobStatus::Complete => "complete",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Lifecycle bookkeeping shared by every job kind.
#[derive(Debug, Clone)]
pub struct JobState {
    status: JobStatus,
    err: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl JobState {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::Default,
            err: None,
            created: now,
            updated: now,
        }
    }

    #[must_use]
    pub fn status(&self) -> (JobStatus, Option<&str>) {
        (self.status, self.err.as_deref())
    }

    /// Returns the previous status.
    pub fn set(&mut self, status: JobStatus, err: Option<String>) -> JobStatus {
        let previous = self.status;
        self.status = status;
        self.err = err;
        self.updated = Utc::now();
        previous
    }

    /// Only a job that has not reached a worker can be cancelled.
    pub fn cancel(&mut self) -> JobStatus {
        if self.status.is_pending() {
            self.set(JobStatus::Cancelled, None);
        }
        self.status
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Unit of work run by the [`WorkerPool`].
#[async_trait]
pub trait Job: Send {
    fn job_type(&self) -> JobType;

    /// Performs the work. Called at most once, by a pool worker.
    async fn run(&mut self);

    fn status(&self) -> (JobStatus, Option<String>);

    /// Returns the previous status.
    fn set_status(&mut self, status: JobStatus, err: Option<String>) -> JobStatus;

    /// No-op once the job has left the queue. Returns the resulting status.
    fn cancel(&mut self) -> JobStatus;
}
