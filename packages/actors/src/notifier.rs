//! Reporting of job failures to an external sink.

use queue_core::{Job, JobFailure};

/// Receives every job failure that is not suppressed by its handler.
pub trait ErrorNotifier: Send + Sync + 'static {
    fn notify(&self, failure: &JobFailure, job: &Job);
}

impl<F> ErrorNotifier for F
where
    F: Fn(&JobFailure, &Job) + Send + Sync + 'static,
{
    fn notify(&self, failure: &JobFailure, job: &Job) {
        self(failure, job)
    }
}

/// Logs failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ErrorNotifier for LogNotifier {
    fn notify(&self, failure: &JobFailure, job: &Job) {
        tracing::error!(
            job_id = %job.id,
            job_class = %job.job_class,
            error_count = job.error_count,
            "Job failed: {}",
            failure
        );
    }
}
