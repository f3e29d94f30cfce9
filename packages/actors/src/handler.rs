//! Job handler trait and registry.

use queue_core::{ErrorAction, Job, JobFailure, ResolveAction, RetryPolicy};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result type for job handlers.
pub type HandlerResult = Result<(), JobFailure>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Error hook signature used by [`FnHandler`].
pub type ErrorHook = Arc<dyn Fn(&Job, &JobFailure) -> Result<ErrorAction, JobFailure> + Send + Sync>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific class are processed and how their
/// failures are retried.
pub trait JobHandler: Send + Sync + 'static {
    /// The job class this handler processes.
    fn job_class(&self) -> &str;

    /// Run one attempt of a job.
    fn run(&self, job: &Job) -> HandlerFuture;

    /// Delay schedule for retries.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::Default
    }

    /// Overrides the locker-wide maximum retry count.
    fn maximum_retry_count(&self) -> Option<i32> {
        None
    }

    /// What happens to the row after a successful attempt.
    fn resolve_action(&self) -> ResolveAction {
        ResolveAction::Destroy
    }

    /// Decide what to do with a failed attempt.
    ///
    /// `job.error_count` is the count before this failure. Returning an error applies
    /// [`ErrorAction::Default`] after the hook's own failure is reported.
    fn handle_error(&self, _job: &Job, _failure: &JobFailure) -> Result<ErrorAction, JobFailure> {
        Ok(ErrorAction::Default)
    }
}

/// Registry for job handlers.
///
/// Maps job classes to their handlers for dynamic dispatch.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job class.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let job_class = handler.job_class().to_string();
        self.handlers.insert(job_class, Arc::new(handler));
    }

    /// Get a handler for a job class.
    pub fn get(&self, job_class: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_class).cloned()
    }

    /// Resolve a job class, turning a missing or malformed name into a job failure.
    pub fn resolve(&self, job_class: &str) -> Result<Arc<dyn JobHandler>, JobFailure> {
        if job_class.trim().is_empty() || job_class.chars().any(char::is_control) {
            return Err(JobFailure::malformed_class(job_class));
        }
        self.get(job_class)
            .ok_or_else(|| JobFailure::unknown_class(job_class))
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    job_class: String,
    handler: F,
    retry_policy: RetryPolicy,
    maximum_retry_count: Option<i32>,
    resolve_action: ResolveAction,
    error_hook: Option<ErrorHook>,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(job_class: impl Into<String>, handler: F) -> Self {
        Self {
            job_class: job_class.into(),
            handler,
            retry_policy: RetryPolicy::Default,
            maximum_retry_count: None,
            resolve_action: ResolveAction::Destroy,
            error_hook: None,
        }
    }

    /// Set the retry delay schedule.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the maximum retry count for this class.
    pub fn with_maximum_retry_count(mut self, count: i32) -> Self {
        self.maximum_retry_count = Some(count);
        self
    }

    /// Set what happens to the row after success.
    pub fn with_resolve_action(mut self, action: ResolveAction) -> Self {
        self.resolve_action = action;
        self
    }

    /// Set the error hook.
    pub fn with_error_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(&Job, &JobFailure) -> Result<ErrorAction, JobFailure> + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn job_class(&self) -> &str {
        &self.job_class
    }

    fn run(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    fn maximum_retry_count(&self) -> Option<i32> {
        self.maximum_retry_count
    }

    fn resolve_action(&self) -> ResolveAction {
        self.resolve_action
    }

    fn handle_error(&self, job: &Job, failure: &JobFailure) -> Result<ErrorAction, JobFailure> {
        match &self.error_hook {
            Some(hook) => hook(job, failure),
            None => Ok(ErrorAction::Default),
        }
    }
}
