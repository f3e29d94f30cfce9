//! Message types for actor communication.

use queue_core::{JobId, JobNotification};
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};

/// Snapshot of a running locker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockerInfo {
    /// Session id the locker registered under.
    pub locker_id: String,
    /// Ids whose advisory lock the locker holds.
    pub locked: Vec<JobId>,
    /// Entries waiting in the job queue.
    pub buffered: usize,
    pub worker_count: usize,
}

/// Messages for the LockerActor.
#[derive(Debug)]
pub enum LockerMessage {
    /// Look for claimable jobs in the store.
    Poll,

    /// Refresh the locker's registration so other lockers do not reap its locks.
    Heartbeat,

    /// A job was published on the notification channel.
    JobAvailable(JobNotification),

    /// Release the locks of jobs the workers have finished.
    DrainResults,

    /// Get locker info.
    Info { reply: RpcReplyPort<LockerInfo> },

    /// Stop workers, release every lock and unregister.
    Stop { reply: RpcReplyPort<()> },
}

/// Error type for locker operations.
#[derive(Debug, thiserror::Error)]
pub enum LockerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] queue_core::ConfigError),

    #[error("Failed to spawn locker: {0}")]
    Spawn(String),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Timeout")]
    Timeout,
}
