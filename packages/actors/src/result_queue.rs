//! Completed job ids flowing from workers back to the locker.

use std::sync::{Mutex, MutexGuard, PoisonError};

use queue_core::JobId;
use tokio::sync::Notify;

/// Multi-producer channel of worked job ids, drained in batches by the locker.
#[derive(Default)]
pub struct ResultQueue {
    ids: Mutex<Vec<JobId>>,
    pushed: Notify,
}

impl ResultQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn ids(&self) -> MutexGuard<'_, Vec<JobId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, id: JobId) {
        self.ids().push(id);
        self.pushed.notify_one();
    }

    pub fn push_all(&self, ids: impl IntoIterator<Item = JobId>) {
        self.ids().extend(ids);
        self.pushed.notify_one();
    }

    /// Take every id pushed since the last drain.
    pub fn drain(&self) -> Vec<JobId> {
        std::mem::take(&mut *self.ids())
    }

    pub fn to_vec(&self) -> Vec<JobId> {
        self.ids().clone()
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    /// Wait for the next push. A push with nobody waiting is remembered for the next call.
    pub async fn notified(&self) {
        self.pushed.notified().await;
    }
}
