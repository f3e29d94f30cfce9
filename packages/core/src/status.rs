//! Read model projecting job rows and lock state into a display status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Job;

/// Derived state of a job, as shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// `run_at` is still in the future.
    Scheduled,
    /// Due, not locked, never failed.
    Queued,
    /// A locker currently holds the job's advisory lock.
    Running,
    /// The row was retained with `finished_at` set.
    Completed,
    /// Failed at least once and waiting for its next attempt.
    Errored,
    /// Ran out of retries.
    Failed,
}

impl JobState {
    /// Classify a row. Terminal markers win over the lock, the lock wins over history.
    pub fn classify(job: &Job, locked: bool, now: DateTime<Utc>) -> Self {
        if job.expired_at.is_some() {
            JobState::Failed
        } else if job.finished_at.is_some() {
            JobState::Completed
        } else if locked {
            JobState::Running
        } else if job.error_count > 0 {
            JobState::Errored
        } else if job.run_at <= now {
            JobState::Queued
        } else {
            JobState::Scheduled
        }
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Errored => "errored",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job row together with its derived state and lock owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub state: JobState,
    /// Session id of the locker holding the job, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
}

impl JobView {
    pub fn new(job: Job, locked_by: Option<String>, now: DateTime<Utc>) -> Self {
        let state = JobState::classify(&job, locked_by.is_some(), now);
        Self {
            job,
            state,
            locked_by,
        }
    }
}
