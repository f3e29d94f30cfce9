//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job rows, ids and the enqueue builder
//! - Retry policies, failures and resolve actions
//! - The `JobStore` interface and locker configuration
//! - Events and the derived job status read model

mod config;
mod events;
mod failure;
mod job;
mod retry;
mod status;
mod store;

pub use config::{ConfigError, HEARTBEATS_PER_TTL, LockerConfig};
pub use events::JobEvent;
pub use failure::{FailureKind, FailureRecord, JobFailure};
pub use job::{DEFAULT_PRIORITY, DEFAULT_QUEUE, Job, JobId, NewJob};
pub use retry::{
    DEFAULT_MAXIMUM_RETRY_COUNT, ErrorAction, ResolveAction, RetryPolicy, default_backoff,
};
pub use status::{JobState, JobView};
pub use store::{
    CandidateQuery, JobNotification, JobStore, LockerRecord, NotificationStream, new_session_id,
};
