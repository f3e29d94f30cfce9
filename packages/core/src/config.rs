//! Locker and worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DEFAULT_QUEUE;
use crate::retry::DEFAULT_MAXIMUM_RETRY_COUNT;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one queue name is required")]
    NoQueues,
    #[error("queue names must not be empty")]
    EmptyQueueName,
    #[error("worker_count must be positive")]
    NoWorkers,
    #[error("maximum_buffer_size must be positive")]
    NoBuffer,
    #[error("poll_interval_ms must be positive")]
    ZeroPollInterval,
    #[error("maximum_retry_count must not be negative")]
    NegativeRetryCount,
    #[error("heartbeat_interval_ms must be positive")]
    ZeroHeartbeatInterval,
    #[error("heartbeat every {interval_ms}ms cannot keep a {ttl_ms}ms locker TTL alive")]
    HeartbeatTooSlow { interval_ms: u64, ttl_ms: u64 },
}

/// Heartbeats that must fit into one locker TTL.
pub const HEARTBEATS_PER_TTL: u32 = 3;

/// Configuration for a locker and its worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockerConfig {
    /// Queues this locker dispatches.
    pub queues: Vec<String>,
    /// Number of workers in the pool.
    pub worker_count: usize,
    /// Priority thresholds for the first workers; the remaining workers take any job.
    pub worker_priorities: Vec<i16>,
    /// Whether to poll the store periodically.
    pub poll: bool,
    /// Interval between polls (milliseconds).
    pub poll_interval_ms: u64,
    /// Whether to subscribe to job notifications.
    pub listen: bool,
    /// Interval between heartbeats (milliseconds), independent of polling.
    pub heartbeat_interval_ms: u64,
    /// Capacity of the in-memory job buffer.
    pub maximum_buffer_size: usize,
    /// Failures tolerated before a job expires, unless its handler overrides it.
    pub maximum_retry_count: i32,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_string()],
            worker_count: 6,
            worker_priorities: vec![10, 30, 50],
            poll: true,
            poll_interval_ms: 5_000,
            listen: true,
            heartbeat_interval_ms: 10_000,
            maximum_buffer_size: 8,
            maximum_retry_count: DEFAULT_MAXIMUM_RETRY_COUNT,
        }
    }
}

impl LockerConfig {
    /// Set the queues to dispatch.
    pub fn with_queues<I, Q>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    /// Set the number of workers.
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the priority thresholds of the first workers.
    pub fn with_worker_priorities(mut self, priorities: Vec<i16>) -> Self {
        self.worker_priorities = priorities;
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable periodic polling.
    pub fn with_poll(mut self, poll: bool) -> Self {
        self.poll = poll;
        self
    }

    /// Enable or disable notification listening.
    pub fn with_listen(mut self, listen: bool) -> Self {
        self.listen = listen;
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the buffer capacity.
    pub fn with_maximum_buffer_size(mut self, size: usize) -> Self {
        self.maximum_buffer_size = size;
        self
    }

    /// Set the default maximum retry count.
    pub fn with_maximum_retry_count(mut self, count: i32) -> Self {
        self.maximum_retry_count = count;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Priority threshold of each worker, in pool order.
    pub fn worker_thresholds(&self) -> Vec<Option<i16>> {
        (0..self.worker_count)
            .map(|i| self.worker_priorities.get(i).copied())
            .collect()
    }

    /// Check the configuration before starting a locker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        if self.queues.iter().any(|q| q.trim().is_empty()) {
            return Err(ConfigError::EmptyQueueName);
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.maximum_buffer_size == 0 {
            return Err(ConfigError::NoBuffer);
        }
        if self.poll && self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.maximum_retry_count < 0 {
            return Err(ConfigError::NegativeRetryCount);
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        Ok(())
    }

    /// Check that heartbeats arrive at least [`HEARTBEATS_PER_TTL`] times per `ttl`, so a
    /// live locker is never reaped by another one.
    pub fn validate_heartbeat(&self, ttl: Duration) -> Result<(), ConfigError> {
        let cycle = self.heartbeat_interval().checked_mul(HEARTBEATS_PER_TTL);
        if cycle.is_none_or(|cycle| cycle > ttl) {
            return Err(ConfigError::HeartbeatTooSlow {
                interval_ms: self.heartbeat_interval_ms,
                ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }
}
