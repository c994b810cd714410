//! Queued jobs: on-demand requests to run a work type, with bounded retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::work::{Priority, WorkItem};
use crate::error::Error;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A queued request to execute a work type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Registered work type id this job runs.
    pub work_type: String,

    /// Subject handed to the work type's body. Empty for subject-less types.
    pub subject: String,

    pub priority: Priority,

    /// Arbitrary parameters. The queue doesn't interpret these.
    pub payload: serde_json::Map<String, serde_json::Value>,

    pub status: JobStatus,

    /// Failed attempts so far.
    pub retries: u32,
    pub max_retries: u32,

    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be dispatched. Pushed forward by retry backoff.
    pub available_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn item(&self) -> WorkItem {
        WorkItem::new(&self.work_type, &self.subject)
    }

    /// Total attempts made, counting one in progress.
    pub fn attempt(&self) -> u32 {
        self.retries + 1
    }
}

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|e| Error::Other(format!("invalid job id {s}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `available_at` and a free worker.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Done successfully. Terminal.
    Completed,
    /// Exhausted retries. Terminal.
    Failed,
}

impl JobStatus {
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Pending)    // retry with backoff
                | (Running, Failed) // exhausted retries
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Other(format!("invalid job status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One dispatch of a job, kept in bounded history for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub job_id: JobId,
    pub work_type: String,
    pub subject: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Failed, rescheduled with backoff.
    Retrying,
    /// Failed with no retries left.
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Retrying => "retrying",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RunStatus::Completed),
            "retrying" => Ok(RunStatus::Retrying),
            "failed" => Ok(RunStatus::Failed),
            other => Err(Error::Other(format!("invalid run status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new jobs. The queue's public API for enqueueing work.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub(crate) work_type: String,
    pub(crate) subject: String,
    pub(crate) priority: Option<Priority>,
    pub(crate) payload: serde_json::Map<String, serde_json::Value>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) available_at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(work_type: impl Into<String>) -> Self {
        Self {
            work_type: work_type.into(),
            subject: String::new(),
            priority: None,
            payload: serde_json::Map::new(),
            max_retries: None,
            available_at: None,
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Defaults to the work type's own priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Defaults to the queue's configured max retries.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Delay dispatch until `at`.
    pub fn available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = Some(at);
        self
    }

    pub fn work_type(&self) -> &str {
        &self.work_type
    }
}
