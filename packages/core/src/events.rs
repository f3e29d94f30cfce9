//! Event types emitted while lockers and workers process jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Events emitted by lockers and workers, in the order they happen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Locker events
    /// A locker registered and started its workers.
    LockerStarted {
        locker_id: String,
        worker_count: usize,
        queues: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// A locker released its locks and unregistered.
    LockerStopped {
        locker_id: String,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A locker claimed a job's advisory lock.
    JobLocked {
        job_id: JobId,
        priority: i16,
        locker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A claimed job was pushed out of a full buffer and its lock released.
    JobEvicted {
        job_id: JobId,
        priority: i16,
        timestamp: DateTime<Utc>,
    },
    /// A worker started executing a job.
    JobStarted {
        job_id: JobId,
        job_class: String,
        priority: i16,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job ran successfully.
    JobWorked {
        job_id: JobId,
        job_class: String,
        priority: i16,
        worker_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job attempt failed.
    JobErrored {
        job_id: JobId,
        job_class: String,
        priority: i16,
        worker_id: String,
        error: String,
        error_count: i32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A locker released a job's advisory lock after it was worked.
    JobReleased {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::LockerStarted { timestamp, .. } => *timestamp,
            JobEvent::LockerStopped { timestamp, .. } => *timestamp,
            JobEvent::JobLocked { timestamp, .. } => *timestamp,
            JobEvent::JobEvicted { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobWorked { timestamp, .. } => *timestamp,
            JobEvent::JobErrored { timestamp, .. } => *timestamp,
            JobEvent::JobReleased { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobLocked { job_id, .. } => Some(*job_id),
            JobEvent::JobEvicted { job_id, .. } => Some(*job_id),
            JobEvent::JobStarted { job_id, .. } => Some(*job_id),
            JobEvent::JobWorked { job_id, .. } => Some(*job_id),
            JobEvent::JobErrored { job_id, .. } => Some(*job_id),
            JobEvent::JobReleased { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::LockerStarted {
                locker_id,
                worker_count,
                ..
            } => format!("Locker {} started with {} workers", locker_id, worker_count),
            JobEvent::LockerStopped { locker_id, .. } => format!("Locker {} stopped", locker_id),
            JobEvent::JobLocked {
                job_id, locker_id, ..
            } => format!("Job {} locked by {}", job_id, locker_id),
            JobEvent::JobEvicted { job_id, .. } => format!("Job {} evicted", job_id),
            JobEvent::JobStarted {
                job_id, worker_id, ..
            } => format!("Job {} started by {}", job_id, worker_id),
            JobEvent::JobWorked {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} worked in {}ms", job_id, duration_ms),
            JobEvent::JobErrored {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} errored: {}{}", job_id, error, retry)
            }
            JobEvent::JobReleased { job_id, .. } => format!("Job {} released", job_id),
        }
    }
}
