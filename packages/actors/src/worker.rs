//! Workers pop claimed jobs, run them and record the outcome on the row.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use queue_core::{
    DEFAULT_MAXIMUM_RETRY_COUNT, ErrorAction, FailureRecord, Job, JobEvent, JobFailure, JobStore,
    ResolveAction, RetryPolicy,
};
use tokio::sync::broadcast;

use crate::handler::{HandlerResult, JobHandler, JobHandlerRegistry};
use crate::job_queue::JobQueue;
use crate::notifier::{ErrorNotifier, LogNotifier};
use crate::result_queue::ResultQueue;

/// Shared dependencies of every worker in a pool.
pub struct WorkerContext<S: JobStore> {
    pub store: Arc<S>,
    pub handlers: Arc<JobHandlerRegistry>,
    pub notifier: Arc<dyn ErrorNotifier>,
    pub event_tx: Option<broadcast::Sender<JobEvent>>,
    /// Used for handlers that do not set their own maximum.
    pub maximum_retry_count: i32,
}

impl<S: JobStore> Clone for WorkerContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            handlers: self.handlers.clone(),
            notifier: self.notifier.clone(),
            event_tx: self.event_tx.clone(),
            maximum_retry_count: self.maximum_retry_count,
        }
    }
}

impl<S: JobStore> WorkerContext<S> {
    pub fn new(store: Arc<S>, handlers: Arc<JobHandlerRegistry>) -> Self {
        Self {
            store,
            handlers,
            notifier: Arc::new(LogNotifier),
            event_tx: None,
            maximum_retry_count: DEFAULT_MAXIMUM_RETRY_COUNT,
        }
    }

    /// Set the error notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn ErrorNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Set the default maximum retry count.
    pub fn with_maximum_retry_count(mut self, count: i32) -> Self {
        self.maximum_retry_count = count;
        self
    }
}

/// What one attempt did to the job row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The job ran and was resolved with its resolve action.
    Succeeded,
    /// The attempt failed and the job was rescheduled.
    Retried {
        error_count: i32,
        run_at: DateTime<Utc>,
    },
    /// The attempt failed and the job ran out of retries.
    Expired { error_count: i32 },
    /// The attempt failed and the error hook deleted the job.
    Destroyed,
    /// The attempt failed and the error hook suppressed the failure.
    Suppressed,
}

/// A single worker. Run it with [`Worker::run`] or drive one attempt with [`Worker::work`].
pub struct Worker<S: JobStore> {
    id: String,
    priority: Option<i16>,
    context: WorkerContext<S>,
    job_queue: Arc<JobQueue>,
    result_queue: Arc<ResultQueue>,
}

impl<S: JobStore> Worker<S> {
    pub fn new(
        id: impl Into<String>,
        priority: Option<i16>,
        context: WorkerContext<S>,
        job_queue: Arc<JobQueue>,
        result_queue: Arc<ResultQueue>,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            context,
            job_queue,
            result_queue,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Highest priority value this worker accepts, if any.
    pub fn priority(&self) -> Option<i16> {
        self.priority
    }

    /// Work jobs until the job queue is stopped.
    pub async fn run(self) {
        tracing::info!("Starting worker: {} (priority {:?})", self.id, self.priority);

        while let Some(entry) = self.job_queue.pop(self.priority).await {
            let id = entry.id();
            self.work(entry.job).await;
            self.result_queue.push(id);
        }

        tracing::info!("Worker stopped: {}", self.id);
    }

    /// Run one attempt of a job and write its outcome to the store.
    pub async fn work(&self, job: Job) -> WorkOutcome {
        let started = Instant::now();
        self.broadcast(JobEvent::JobStarted {
            job_id: job.id,
            job_class: job.job_class.clone(),
            priority: job.priority,
            worker_id: self.id.clone(),
            timestamp: Utc::now(),
        });

        let (handler, result) = match self.context.handlers.resolve(&job.job_class) {
            Ok(handler) => {
                let result = run_handler(handler.as_ref(), &job).await;
                (Some(handler), result)
            }
            Err(failure) => (None, Err(failure)),
        };

        match result {
            Ok(()) => {
                let action = handler
                    .as_ref()
                    .map_or(ResolveAction::Destroy, |h| h.resolve_action());
                self.resolve(&job, action).await;

                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::debug!("Worked job {} ({}) in {}ms", job.id, job.job_class, duration_ms);
                self.broadcast(JobEvent::JobWorked {
                    job_id: job.id,
                    job_class: job.job_class.clone(),
                    priority: job.priority,
                    worker_id: self.id.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                WorkOutcome::Succeeded
            }
            Err(failure) => self.fail(&job, handler.as_deref(), failure).await,
        }
    }

    async fn fail(
        &self,
        job: &Job,
        handler: Option<&dyn JobHandler>,
        failure: JobFailure,
    ) -> WorkOutcome {
        let error_count = job.error_count.saturating_add(1);
        let action = match handler {
            Some(handler) => self.consult_hook(handler, job, &failure),
            None => ErrorAction::Default,
        };

        let outcome = match action {
            ErrorAction::Suppress => {
                let resolve = handler.map_or(ResolveAction::Destroy, |h| h.resolve_action());
                tracing::debug!("Suppressed failure of job {}: {}", job.id, failure);
                if resolve == ResolveAction::Finish {
                    let message = failure.message().to_string();
                    let backtrace = failure.backtrace().to_string();
                    if let Err(e) = self.context.store.record_error(job.id, message, backtrace).await
                    {
                        tracing::warn!("Failed to record error for job {}: {}", job.id, e);
                    }
                }
                self.resolve(job, resolve).await;
                WorkOutcome::Suppressed
            }
            ErrorAction::Destroy => {
                self.report(&failure, job);
                if let Err(e) = self.context.store.destroy(job.id).await {
                    tracing::warn!("Failed to destroy job {}: {}", job.id, e);
                }
                WorkOutcome::Destroyed
            }
            ErrorAction::RetryIn(delay) => {
                self.report(&failure, job);
                self.retry(job, &failure, error_count, delay).await
            }
            ErrorAction::Default => {
                self.report(&failure, job);
                let maximum = handler
                    .and_then(|h| h.maximum_retry_count())
                    .unwrap_or(self.context.maximum_retry_count);

                if error_count > maximum {
                    let record = FailureRecord::new(&failure, error_count, Utc::now());
                    if let Err(e) = self.context.store.expire(job.id, record).await {
                        tracing::warn!("Failed to expire job {}: {}", job.id, e);
                    }
                    WorkOutcome::Expired { error_count }
                } else {
                    let policy = handler.map_or(RetryPolicy::Default, |h| h.retry_policy());
                    let delay = policy.delay(error_count);
                    self.retry(job, &failure, error_count, delay).await
                }
            }
        };

        tracing::error!(
            job_id = %job.id,
            job_class = %job.job_class,
            error_count,
            "Job errored: {} ({:?})",
            failure,
            outcome
        );
        self.broadcast(JobEvent::JobErrored {
            job_id: job.id,
            job_class: job.job_class.clone(),
            priority: job.priority,
            worker_id: self.id.clone(),
            error: failure.message().to_string(),
            error_count,
            will_retry: matches!(outcome, WorkOutcome::Retried { .. }),
            timestamp: Utc::now(),
        });

        outcome
    }

    /// Ask the handler's error hook what to do. A failing hook falls back to the default.
    fn consult_hook(&self, handler: &dyn JobHandler, job: &Job, failure: &JobFailure) -> ErrorAction {
        match catch_unwind(AssertUnwindSafe(|| handler.handle_error(job, failure))) {
            Ok(Ok(action)) => action,
            Ok(Err(hook_failure)) => {
                self.report(&hook_failure, job);
                ErrorAction::Default
            }
            Err(payload) => {
                self.report(&JobFailure::hook(panic_message(payload.as_ref())), job);
                ErrorAction::Default
            }
        }
    }

    async fn retry(
        &self,
        job: &Job,
        failure: &JobFailure,
        error_count: i32,
        delay: Duration,
    ) -> WorkOutcome {
        let run_at = retry_at(Utc::now(), delay);
        let record = FailureRecord::new(failure, error_count, run_at);
        if let Err(e) = self.context.store.retry(job.id, record).await {
            tracing::warn!("Failed to reschedule job {}: {}", job.id, e);
        }
        WorkOutcome::Retried {
            error_count,
            run_at,
        }
    }

    async fn resolve(&self, job: &Job, action: ResolveAction) {
        let result = match action {
            ResolveAction::Destroy => self.context.store.destroy(job.id).await,
            ResolveAction::Finish => self.context.store.finish(job.id).await,
        };
        if let Err(e) = result {
            tracing::warn!("Failed to resolve job {}: {}", job.id, e);
        }
    }

    fn report(&self, failure: &JobFailure, job: &Job) {
        let notifier = &self.context.notifier;
        if catch_unwind(AssertUnwindSafe(|| notifier.notify(failure, job))).is_err() {
            tracing::warn!("Error notifier panicked for job {}", job.id);
        }
    }

    fn broadcast(&self, event: JobEvent) {
        if let Some(ref tx) = self.context.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Run a handler with panics turned into failures.
async fn run_handler(handler: &dyn JobHandler, job: &Job) -> HandlerResult {
    let future = match catch_unwind(AssertUnwindSafe(|| handler.run(job))) {
        Ok(future) => future,
        Err(payload) => return Err(JobFailure::panicked(panic_message(payload.as_ref()))),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(JobFailure::panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `now + delay`, saturating at the latest representable time.
fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_at_saturates() {
        let now = Utc::now();
        assert_eq!(retry_at(now, Duration::from_secs(4)), now + chrono::Duration::seconds(4));
        assert_eq!(retry_at(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
