//! Bounded in-process priority queue of claimed jobs waiting for a worker.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId};
use tokio::sync::Notify;

/// Sort key of a queue entry. Lower keys are worked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobKey {
    pub priority: i16,
    pub run_at: DateTime<Utc>,
    pub id: JobId,
}

impl From<&Job> for JobKey {
    fn from(job: &Job) -> Self {
        Self {
            priority: job.priority,
            run_at: job.run_at,
            id: job.id,
        }
    }
}

/// A claimed job, carried with everything a worker needs to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub key: JobKey,
    pub job: Job,
}

impl QueueEntry {
    pub fn id(&self) -> JobId {
        self.key.id
    }

    pub fn priority(&self) -> i16 {
        self.key.priority
    }
}

impl From<Job> for QueueEntry {
    fn from(job: Job) -> Self {
        Self {
            key: JobKey::from(&job),
            job,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<JobKey, Job>,
    stopped: bool,
}

/// Priority queue shared by the locker (producer) and the workers (consumers).
///
/// Holds at most `maximum_size` entries. Pushing past capacity evicts the worst entries,
/// which are handed back so their claims can be released.
pub struct JobQueue {
    maximum_size: usize,
    inner: Mutex<Inner>,
    available: Notify,
}

impl JobQueue {
    pub fn new(maximum_size: usize) -> Self {
        Self {
            maximum_size,
            inner: Mutex::new(Inner::default()),
            available: Notify::new(),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert entries and return whatever no longer fits, worst first.
    pub fn push(&self, entries: impl IntoIterator<Item = QueueEntry>) -> Vec<QueueEntry> {
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner();
            if inner.stopped {
                return entries.into_iter().collect();
            }

            for entry in entries {
                inner.entries.insert(entry.key, entry.job);
            }

            while inner.entries.len() > self.maximum_size {
                match inner.entries.pop_last() {
                    Some((key, job)) => evicted.push(QueueEntry { key, job }),
                    None => break,
                }
            }
        }

        self.available.notify_waiters();
        evicted
    }

    /// Wait for the best entry with `priority <= threshold` and take it.
    ///
    /// With no threshold any entry qualifies. Returns `None` once the queue is stopped.
    pub async fn pop(&self, threshold: Option<i16>) -> Option<QueueEntry> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner();
                if inner.stopped {
                    return None;
                }
                if let Some(entry) = Self::take_first(&mut inner, threshold) {
                    return Some(entry);
                }
            }

            notified.await;
        }
    }

    /// Take the best qualifying entry without waiting.
    pub fn try_pop(&self, threshold: Option<i16>) -> Option<QueueEntry> {
        let mut inner = self.inner();
        if inner.stopped {
            return None;
        }
        Self::take_first(&mut inner, threshold)
    }

    fn take_first(inner: &mut Inner, threshold: Option<i16>) -> Option<QueueEntry> {
        let first = inner.entries.first_key_value()?.0;
        if threshold.is_some_and(|max| first.priority > max) {
            return None;
        }
        inner
            .entries
            .pop_first()
            .map(|(key, job)| QueueEntry { key, job })
    }

    /// Wake every waiter; all pops return `None` from now on.
    pub fn stop(&self) {
        self.inner().stopped = true;
        self.available.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner().stopped
    }

    /// Remove every resident entry.
    pub fn clear(&self) -> Vec<QueueEntry> {
        let entries = std::mem::take(&mut self.inner().entries);
        entries
            .into_iter()
            .map(|(key, job)| QueueEntry { key, job })
            .collect()
    }

    /// Keys of the resident entries in pop order.
    pub fn to_vec(&self) -> Vec<JobKey> {
        self.inner().entries.keys().copied().collect()
    }

    /// Ids of the resident entries.
    pub fn ids(&self) -> Vec<JobId> {
        self.inner().entries.keys().map(|key| key.id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().entries.is_empty()
    }

    pub fn maximum_size(&self) -> usize {
        self.maximum_size
    }

    /// Free slots before pushes start evicting.
    pub fn space(&self) -> usize {
        self.maximum_size.saturating_sub(self.len())
    }

    /// Priority of the worst resident entry.
    pub fn lowest_priority(&self) -> Option<i16> {
        self.inner().entries.last_key_value().map(|(key, _)| key.priority)
    }

    /// Whether an entry with this key would be kept if pushed now.
    pub fn accepts(&self, key: &JobKey) -> bool {
        let inner = self.inner();
        if inner.stopped {
            return false;
        }
        if inner.entries.len() < self.maximum_size {
            return true;
        }
        inner
            .entries
            .last_key_value()
            .is_some_and(|(worst, _)| key < worst)
    }
}
