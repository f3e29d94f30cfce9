//! Job-level failures and the record persisted for them.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::Location;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a job failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler returned an error.
    Execution,
    /// The job class could not be resolved to a handler.
    Resolution,
    /// The handler panicked.
    Panic,
    /// The handler's error hook failed while handling another failure.
    Hook,
}

/// Error produced by a job attempt.
///
/// Any `std::error::Error` converts into a `JobFailure` with `?`, so it does not implement
/// `Error` itself. The backtrace text starts with the location the failure was raised at.
#[derive(Debug, Clone)]
pub struct JobFailure {
    kind: FailureKind,
    message: String,
    backtrace: String,
}

impl JobFailure {
    /// Fail the current attempt with a message.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(FailureKind::Execution, message.into(), Location::caller())
    }

    /// The job class is not registered.
    #[track_caller]
    pub fn unknown_class(job_class: &str) -> Self {
        Self::with_kind(
            FailureKind::Resolution,
            format!("uninitialized job class: {job_class}"),
            Location::caller(),
        )
    }

    /// The job class name is not a valid handler name.
    #[track_caller]
    pub fn malformed_class(job_class: &str) -> Self {
        Self::with_kind(
            FailureKind::Resolution,
            format!("malformed job class: {job_class:?}"),
            Location::caller(),
        )
    }

    /// The handler panicked with the given payload text.
    #[track_caller]
    pub fn panicked(message: impl std::fmt::Display) -> Self {
        Self::with_kind(
            FailureKind::Panic,
            format!("job panicked: {message}"),
            Location::caller(),
        )
    }

    /// The error hook itself failed.
    #[track_caller]
    pub fn hook(message: impl std::fmt::Display) -> Self {
        Self::with_kind(
            FailureKind::Hook,
            format!("error hook failed: {message}"),
            Location::caller(),
        )
    }

    fn with_kind(kind: FailureKind, message: String, location: &'static Location<'static>) -> Self {
        let captured = Backtrace::capture();
        let mut backtrace = location.to_string();
        if captured.status() == BacktraceStatus::Captured {
            backtrace.push('\n');
            backtrace.push_str(&captured.to_string());
        }
        Self {
            kind,
            message,
            backtrace,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn backtrace(&self) -> &str {
        &self.backtrace
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E> From<E> for JobFailure
where
    E: std::error::Error,
{
    #[track_caller]
    fn from(error: E) -> Self {
        Self::with_kind(FailureKind::Execution, error.to_string(), Location::caller())
    }
}

/// Failure details written to a job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Error count after this failure.
    pub error_count: i32,
    /// Next attempt time. Ignored when the job expires.
    pub run_at: DateTime<Utc>,
    pub message: String,
    pub backtrace: String,
}

impl FailureRecord {
    pub fn new(failure: &JobFailure, error_count: i32, run_at: DateTime<Utc>) -> Self {
        Self {
            error_count,
            run_at,
            message: failure.message().to_string(),
            backtrace: failure.backtrace().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_and_kinds() {
        let failure = JobFailure::unknown_class("Missing");
        assert_eq!(failure.kind(), FailureKind::Resolution);
        assert_eq!(failure.message(), "uninitialized job class: Missing");

        assert_eq!(
            JobFailure::malformed_class("").message(),
            "malformed job class: \"\""
        );
        assert_eq!(JobFailure::panicked("boom").kind(), FailureKind::Panic);
        assert_eq!(
            JobFailure::hook("broken").message(),
            "error hook failed: broken"
        );
    }

    #[test]
    fn backtrace_starts_at_the_raising_site() {
        let failure = JobFailure::new("nope");
        assert_eq!(failure.kind(), FailureKind::Execution);
        assert!(failure.backtrace().starts_with(file!()));
    }

    #[test]
    fn errors_convert_with_question_mark() {
        fn parse(input: &str) -> Result<i32, JobFailure> {
            Ok(input.parse::<i32>()?)
        }
        let failure = parse("x").err().map(|f| f.message().to_string());
        assert_eq!(failure.as_deref(), Some("invalid digit found in string"));
    }
}
