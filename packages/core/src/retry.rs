//! Retry scheduling and failure resolution policies.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of failures tolerated before a job expires.
pub const DEFAULT_MAXIMUM_RETRY_COUNT: i32 = 15;

/// Default exponential backoff: `error_count^4 + 3` seconds.
pub fn default_backoff(error_count: i32) -> Duration {
    let count = u64::from(error_count.max(0).unsigned_abs());
    let secs = count.saturating_pow(4).saturating_add(3);
    Duration::from_secs(secs)
}

/// How long to wait before retrying a failed job.
#[derive(Clone, Default)]
pub enum RetryPolicy {
    /// Exponential backoff, see [`default_backoff`].
    #[default]
    Default,
    /// The same delay after every failure.
    Fixed(Duration),
    /// A delay computed from the post-increment error count.
    Formula(Arc<dyn Fn(i32) -> Duration + Send + Sync>),
}

impl RetryPolicy {
    /// Build a formula policy from a closure.
    pub fn formula<F>(formula: F) -> Self
    where
        F: Fn(i32) -> Duration + Send + Sync + 'static,
    {
        RetryPolicy::Formula(Arc::new(formula))
    }

    /// Delay before the next attempt, given the error count after this failure.
    pub fn delay(&self, error_count: i32) -> Duration {
        match self {
            RetryPolicy::Default => default_backoff(error_count),
            RetryPolicy::Fixed(delay) => *delay,
            RetryPolicy::Formula(formula) => formula(error_count),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryPolicy::Default => f.write_str("Default"),
            RetryPolicy::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            RetryPolicy::Formula(_) => f.write_str("Formula(..)"),
        }
    }
}

/// What a handler's error hook decided to do with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Apply the default handling: retry with the handler's policy or expire.
    Default,
    /// Retry after the given delay.
    RetryIn(Duration),
    /// Delete the job without retrying.
    Destroy,
    /// Skip the error notifier and resolve the job with its resolve action.
    ///
    /// With [`ResolveAction::Destroy`] the row is deleted along with the error, which then
    /// only shows up in the worker's debug log. Use [`ResolveAction::Finish`] to keep
    /// `last_error_message` on the finished row.
    Suppress,
}

/// What happens to a job row once the job has been worked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveAction {
    /// Delete the row.
    #[default]
    Destroy,
    /// Keep the row and set `finished_at`.
    Finish,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_grows_with_the_fourth_power() {
        assert_eq!(default_backoff(1), Duration::from_secs(4));
        assert_eq!(default_backoff(2), Duration::from_secs(19));
        assert_eq!(default_backoff(6), Duration::from_secs(1299));
        assert_eq!(default_backoff(0), Duration::from_secs(3));
        assert_eq!(default_backoff(-4), Duration::from_secs(3));
    }

    #[test]
    fn policies_compute_delays() {
        assert_eq!(RetryPolicy::default().delay(3), Duration::from_secs(84));
        assert_eq!(
            RetryPolicy::Fixed(Duration::from_secs(5)).delay(9),
            Duration::from_secs(5)
        );

        let linear = RetryPolicy::formula(|count| Duration::from_secs(10 * count as u64));
        assert_eq!(linear.delay(6), Duration::from_secs(60));
        assert_eq!(format!("{:?}", linear), "Formula(..)");
    }
}
