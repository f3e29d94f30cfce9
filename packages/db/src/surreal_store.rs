//! `JobStore` backed by SurrealDB.

use std::time::Duration;

use queue_core::{
    CandidateQuery, FailureRecord, Job, JobId, JobNotification, JobStore, JobView, LockerRecord,
    NewJob, NotificationStream, new_session_id,
};

use crate::repositories::{
    JobRepository, LockRepository, LockerRepository, NotificationRepository,
};
use crate::{Database, DbError};

/// Default age after which another locker's registration is treated as dead.
pub const DEFAULT_LOCKER_TTL: Duration = Duration::from_secs(60);

/// One session on a SurrealDB database.
///
/// Advisory locks live in the `job_lock` table tagged with the session id. A session that
/// disappears without unregistering keeps its locks until its heartbeat is older than the
/// locker TTL and a live locker registers or heartbeats.
#[derive(Clone)]
pub struct SurrealStore {
    session: String,
    locker_ttl: Duration,
    jobs: JobRepository,
    locks: LockRepository,
    lockers: LockerRepository,
    notifications: NotificationRepository,
}

impl SurrealStore {
    /// Open a new session on a connected, schema-initialized database.
    pub fn new(db: Database) -> Self {
        Self {
            session: new_session_id(),
            locker_ttl: DEFAULT_LOCKER_TTL,
            jobs: JobRepository::new(db.clone()),
            locks: LockRepository::new(db.clone()),
            lockers: LockerRepository::new(db.clone()),
            notifications: NotificationRepository::new(db),
        }
    }

    /// Set the heartbeat age after which lockers are reaped.
    pub fn with_locker_ttl(mut self, ttl: Duration) -> Self {
        self.locker_ttl = ttl;
        self
    }

    /// A sibling session on the same database.
    pub fn connect(&self) -> Self {
        Self {
            session: new_session_id(),
            ..self.clone()
        }
    }

    /// Every job row with its derived state.
    pub async fn job_views(&self) -> Result<Vec<JobView>, DbError> {
        let jobs = self.jobs.list().await?;
        let mut holders = self.locks.holders().await?;
        let now = chrono::Utc::now();

        Ok(jobs
            .into_iter()
            .map(|job| {
                let locked_by = holders.remove(&job.id);
                JobView::new(job, locked_by, now)
            })
            .collect())
    }

    /// Ids of every currently locked job.
    pub async fn locked_ids(&self) -> Result<Vec<JobId>, DbError> {
        let mut ids: Vec<JobId> = self.locks.holders().await?.into_keys().collect();
        ids.sort();
        Ok(ids)
    }

    /// Every registered locker.
    pub async fn lockers(&self) -> Result<Vec<LockerRecord>, DbError> {
        self.lockers.list().await
    }
}

impl JobStore for SurrealStore {
    type Error = DbError;

    fn session_id(&self) -> &str {
        &self.session
    }

    async fn enqueue(&self, job: NewJob) -> Result<Job, DbError> {
        let job = self.jobs.create(job).await?;
        tracing::debug!("Enqueued job {} ({})", job.id, job.job_class);
        self.notifications.publish(JobNotification::from(&job)).await?;
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, DbError> {
        self.jobs.get(id).await
    }

    async fn select_candidates(&self, query: CandidateQuery) -> Result<Vec<Job>, DbError> {
        if query.limit == 0 || query.queues.is_empty() {
            return Ok(Vec::new());
        }
        self.jobs.candidates(&query).await
    }

    async fn try_advisory_lock(&self, id: JobId) -> Result<bool, DbError> {
        self.locks.try_lock(id, &self.session).await
    }

    async fn advisory_unlock(&self, id: JobId) -> Result<(), DbError> {
        self.locks.unlock(id, &self.session).await
    }

    async fn destroy(&self, id: JobId) -> Result<(), DbError> {
        self.jobs.delete(id).await
    }

    async fn finish(&self, id: JobId) -> Result<(), DbError> {
        self.jobs.finish(id).await
    }

    async fn retry(&self, id: JobId, failure: FailureRecord) -> Result<(), DbError> {
        self.jobs.retry(id, failure).await
    }

    async fn expire(&self, id: JobId, failure: FailureRecord) -> Result<(), DbError> {
        self.jobs.expire(id, failure).await
    }

    async fn record_error(
        &self,
        id: JobId,
        message: String,
        backtrace: String,
    ) -> Result<(), DbError> {
        self.jobs.record_error(id, message, backtrace).await
    }

    async fn listen(&self) -> Result<NotificationStream, DbError> {
        self.notifications.subscribe().await
    }

    async fn notify(&self, notification: JobNotification) -> Result<(), DbError> {
        self.notifications.publish(notification).await
    }

    async fn register_locker(&self, record: LockerRecord) -> Result<(), DbError> {
        self.lockers.reap_stale(self.locker_ttl).await?;
        self.lockers.upsert(record).await
    }

    fn locker_ttl(&self) -> Option<Duration> {
        Some(self.locker_ttl)
    }

    /// Refresh the heartbeat, then reap lockers that stopped beating and prune old
    /// notifications, so jobs claimed by a crashed session are picked up again.
    async fn heartbeat_locker(&self, id: &str) -> Result<(), DbError> {
        self.lockers.heartbeat(id).await?;
        self.lockers.reap_stale(self.locker_ttl).await
    }

    async fn unregister_locker(&self, id: &str) -> Result<(), DbError> {
        self.lockers.delete(id).await?;
        self.locks.unlock_all(id).await
    }
}
