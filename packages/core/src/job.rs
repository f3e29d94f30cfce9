//! Job domain types for work items in the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue name used when a job does not pick one.
pub const DEFAULT_QUEUE: &str = "default";

/// Priority given to jobs that do not set one. Lower values run first.
pub const DEFAULT_PRIORITY: i16 = 100;

/// Store-assigned identifier for a job.
///
/// The same 64-bit value keys the job's advisory lock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// The raw 64-bit value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job row as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Queue name, used to select which lockers dispatch the job.
    pub queue: String,
    /// Execution priority, lower runs first.
    pub priority: i16,
    /// Earliest time the job may run.
    pub run_at: DateTime<Utc>,
    /// `run_at` as it was when the job was enqueued.
    pub first_run_at: DateTime<Utc>,
    /// Name of the handler that executes this job.
    pub job_class: String,
    /// Positional arguments handed to the handler.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub error_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_backtrace: Option<String>,
    /// Set when the job completed and its row was retained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the job ran out of retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A job is pending until it is finished or expired.
    pub fn is_pending(&self) -> bool {
        self.finished_at.is_none() && self.expired_at.is_none()
    }

    /// Check whether the job is pending and its `run_at` has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.run_at <= now
    }
}

/// Attributes of a job that has not been inserted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub queue: String,
    pub priority: i16,
    pub run_at: DateTime<Utc>,
    pub job_class: String,
    pub args: Vec<serde_json::Value>,
}

impl NewJob {
    /// Create a job for the given handler, due now on the default queue.
    pub fn new(job_class: impl Into<String>) -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            priority: DEFAULT_PRIORITY,
            run_at: Utc::now(),
            job_class: job_class.into(),
            args: Vec::new(),
        }
    }

    /// Set the queue name.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    /// Schedule the job for a later time.
    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }

    /// Set the arguments passed to the handler.
    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }

    /// Build the stored row once the store has assigned an id.
    pub fn into_job(self, id: JobId) -> Job {
        Job {
            id,
            queue: self.queue,
            priority: self.priority,
            run_at: self.run_at,
            first_run_at: self.run_at,
            job_class: self.job_class,
            args: self.args,
            error_count: 0,
            last_error_message: None,
            last_error_backtrace: None,
            finished_at: None,
            expired_at: None,
        }
    }
}
