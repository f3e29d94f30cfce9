//! The store interface the locker and workers are written against.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{FailureRecord, Job, JobId, NewJob};

/// Stream of notifications delivered to a listening session.
pub type NotificationStream = BoxStream<'static, JobNotification>;

/// Generate a fresh session id for a store connection.
pub fn new_session_id() -> String {
    Ulid::new().to_string()
}

/// Payload published when a job becomes available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNotification {
    pub id: JobId,
    pub queue: String,
    pub priority: i16,
    pub run_at: DateTime<Utc>,
    pub job_class: String,
}

impl From<&Job> for JobNotification {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            queue: job.queue.clone(),
            priority: job.priority,
            run_at: job.run_at,
            job_class: job.job_class.clone(),
        }
    }
}

/// Which rows a locker wants to try to claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    /// Only jobs in these queues.
    pub queues: Vec<String>,
    /// Only jobs with `priority <= max_priority`.
    pub max_priority: Option<i16>,
    /// Ids the caller already holds.
    pub exclude: Vec<JobId>,
    /// Only jobs with `run_at <= now`.
    pub now: DateTime<Utc>,
    pub limit: usize,
}

impl CandidateQuery {
    pub fn new(queues: Vec<String>, limit: usize) -> Self {
        Self {
            queues,
            max_priority: None,
            exclude: Vec::new(),
            now: Utc::now(),
            limit,
        }
    }

    pub fn with_max_priority(mut self, max_priority: Option<i16>) -> Self {
        self.max_priority = max_priority;
        self
    }

    pub fn with_exclude(mut self, exclude: Vec<JobId>) -> Self {
        self.exclude = exclude;
        self
    }

    /// Check a row against every filter except the limit and the lock state.
    pub fn matches(&self, job: &Job) -> bool {
        job.is_due(self.now)
            && self.queues.iter().any(|q| *q == job.queue)
            && self.max_priority.is_none_or(|max| job.priority <= max)
            && !self.exclude.contains(&job.id)
    }
}

/// Registration row describing a running locker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockerRecord {
    /// Session id of the locker's store connection.
    pub id: String,
    pub pid: u32,
    pub worker_count: usize,
    pub worker_priorities: Vec<Option<i16>>,
    pub queues: Vec<String>,
    pub listening: bool,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

/// Durable job storage with session-scoped advisory locks and a notification channel.
///
/// Each value is one session: advisory locks belong to the session that took them and are
/// released when it unlocks them, unregisters, or goes away.
pub trait JobStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Identity of this session.
    fn session_id(&self) -> &str;

    /// Insert a job and notify listeners.
    fn enqueue(&self, job: NewJob) -> impl Future<Output = Result<Job, Self::Error>> + Send;

    /// Read a job row.
    fn get_job(&self, id: JobId) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send;

    /// Due, pending, unlocked rows ordered by `(priority, run_at, id)`.
    fn select_candidates(
        &self,
        query: CandidateQuery,
    ) -> impl Future<Output = Result<Vec<Job>, Self::Error>> + Send;

    /// Try to take the advisory lock for a job without waiting.
    ///
    /// Succeeds when the lock is free or already held by this session.
    fn try_advisory_lock(&self, id: JobId)
    -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Release this session's lock on a job. Releasing a lock that is not held is a no-op.
    fn advisory_unlock(&self, id: JobId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Delete a job row.
    fn destroy(&self, id: JobId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Mark a job finished and keep its row.
    fn finish(&self, id: JobId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Record a failure and reschedule the job.
    fn retry(
        &self,
        id: JobId,
        failure: FailureRecord,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Record a failure and mark the job expired.
    fn expire(
        &self,
        id: JobId,
        failure: FailureRecord,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Record the last error text without touching the schedule or error count.
    fn record_error(
        &self,
        id: JobId,
        message: String,
        backtrace: String,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Subscribe this session to job notifications.
    fn listen(&self) -> impl Future<Output = Result<NotificationStream, Self::Error>> + Send;

    /// Publish a notification to every listening session.
    fn notify(
        &self,
        notification: JobNotification,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Insert or replace a locker registration.
    fn register_locker(
        &self,
        record: LockerRecord,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Heartbeat age after which this store reclaims a locker's registration and locks.
    ///
    /// `None` when locks only go away with their session.
    fn locker_ttl(&self) -> Option<Duration> {
        None
    }

    /// Refresh a locker's heartbeat.
    fn heartbeat_locker(&self, id: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Remove a locker registration and every lock its session holds.
    fn unregister_locker(&self, id: &str)
    -> impl Future<Output = Result<(), Self::Error>> + Send;
}
