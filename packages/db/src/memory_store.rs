//! In-process `JobStore` with the same locking and notification semantics as the database.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use queue_core::{
    CandidateQuery, FailureRecord, Job, JobId, JobNotification, JobStore, JobView, LockerRecord,
    NewJob, NotificationStream, new_session_id,
};
use tokio::sync::broadcast;

use crate::DbError;

const NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    jobs: BTreeMap<JobId, Job>,
    locks: HashMap<JobId, String>,
    lockers: HashMap<String, LockerRecord>,
}

struct Shared {
    state: Mutex<MemoryState>,
    notifications: broadcast::Sender<JobNotification>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A session's identity. Its locks are released when the last handle goes away.
struct Session {
    id: String,
    shared: Arc<Shared>,
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        state.locks.retain(|_, holder| *holder != self.id);
    }
}

/// One session on a shared in-memory job table.
///
/// Clones are the same session. [`MemoryStore::connect`] opens another session on the same
/// data, the way a second database connection would.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    session: Arc<Session>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store and its first session.
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let shared = Arc::new(Shared {
            state: Mutex::new(MemoryState::default()),
            notifications,
        });
        Self::with_shared(shared)
    }

    fn with_shared(shared: Arc<Shared>) -> Self {
        let session = Arc::new(Session {
            id: new_session_id(),
            shared: shared.clone(),
        });
        Self { shared, session }
    }

    /// Open another session on the same data.
    pub fn connect(&self) -> Self {
        Self::with_shared(self.shared.clone())
    }

    /// Every job row ordered by id.
    pub fn jobs(&self) -> Vec<Job> {
        self.shared.state().jobs.values().cloned().collect()
    }

    /// Ids of every currently locked job.
    pub fn locked_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.shared.state().locks.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Every registered locker.
    pub fn lockers(&self) -> Vec<LockerRecord> {
        self.shared.state().lockers.values().cloned().collect()
    }

    /// Every job row with its derived state.
    pub fn job_views(&self) -> Vec<JobView> {
        let state = self.shared.state();
        let now = Utc::now();
        state
            .jobs
            .values()
            .map(|job| JobView::new(job.clone(), state.locks.get(&job.id).cloned(), now))
            .collect()
    }

    /// Apply `f` to a job row in place. Missing rows are left alone.
    pub fn update_job(&self, id: JobId, f: impl FnOnce(&mut Job)) {
        if let Some(job) = self.shared.state().jobs.get_mut(&id) {
            f(job);
        }
    }

    fn publish(&self, notification: JobNotification) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.shared.notifications.send(notification);
    }
}

impl JobStore for MemoryStore {
    type Error = DbError;

    fn session_id(&self) -> &str {
        &self.session.id
    }

    async fn enqueue(&self, job: NewJob) -> Result<Job, DbError> {
        let job = {
            let mut state = self.shared.state();
            state.next_id += 1;
            let job = job.into_job(JobId(state.next_id));
            state.jobs.insert(job.id, job.clone());
            job
        };
        tracing::debug!("Enqueued job {} ({})", job.id, job.job_class);
        self.publish(JobNotification::from(&job));
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, DbError> {
        Ok(self.shared.state().jobs.get(&id).cloned())
    }

    async fn select_candidates(&self, query: CandidateQuery) -> Result<Vec<Job>, DbError> {
        let state = self.shared.state();
        let mut candidates: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| query.matches(job) && !state.locks.contains_key(&job.id))
            .cloned()
            .collect();
        candidates.sort_by_key(|job| (job.priority, job.run_at, job.id));
        candidates.truncate(query.limit);
        Ok(candidates)
    }

    async fn try_advisory_lock(&self, id: JobId) -> Result<bool, DbError> {
        let mut state = self.shared.state();
        let holder = state
            .locks
            .entry(id)
            .or_insert_with(|| self.session.id.clone());
        Ok(*holder == self.session.id)
    }

    async fn advisory_unlock(&self, id: JobId) -> Result<(), DbError> {
        let mut state = self.shared.state();
        if state.locks.get(&id) == Some(&self.session.id) {
            state.locks.remove(&id);
        }
        Ok(())
    }

    async fn destroy(&self, id: JobId) -> Result<(), DbError> {
        self.shared.state().jobs.remove(&id);
        Ok(())
    }

    async fn finish(&self, id: JobId) -> Result<(), DbError> {
        self.update_job(id, |job| job.finished_at = Some(Utc::now()));
        Ok(())
    }

    async fn retry(&self, id: JobId, failure: FailureRecord) -> Result<(), DbError> {
        self.update_job(id, |job| {
            job.error_count = failure.error_count;
            job.run_at = failure.run_at;
            job.last_error_message = Some(failure.message);
            job.last_error_backtrace = Some(failure.backtrace);
        });
        Ok(())
    }

    async fn expire(&self, id: JobId, failure: FailureRecord) -> Result<(), DbError> {
        self.update_job(id, |job| {
            job.error_count = failure.error_count;
            job.expired_at = Some(Utc::now());
            job.last_error_message = Some(failure.message);
            job.last_error_backtrace = Some(failure.backtrace);
        });
        Ok(())
    }

    async fn record_error(
        &self,
        id: JobId,
        message: String,
        backtrace: String,
    ) -> Result<(), DbError> {
        self.update_job(id, |job| {
            job.last_error_message = Some(message);
            job.last_error_backtrace = Some(backtrace);
        });
        Ok(())
    }

    async fn listen(&self) -> Result<NotificationStream, DbError> {
        let receiver = self.shared.notifications.subscribe();
        let stream = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(notification) => return Some((notification, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Notification listener lagged, skipped {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn notify(&self, notification: JobNotification) -> Result<(), DbError> {
        self.publish(notification);
        Ok(())
    }

    async fn register_locker(&self, record: LockerRecord) -> Result<(), DbError> {
        self.shared
            .state()
            .lockers
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn heartbeat_locker(&self, id: &str) -> Result<(), DbError> {
        if let Some(record) = self.shared.state().lockers.get_mut(id) {
            record.heartbeat_at = Utc::now();
        }
        Ok(())
    }

    async fn unregister_locker(&self, id: &str) -> Result<(), DbError> {
        let mut state = self.shared.state();
        state.lockers.remove(id);
        state.locks.retain(|_, holder| holder != id);
        Ok(())
    }
}
