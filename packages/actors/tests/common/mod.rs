#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    FnHandler, HandlerFuture, JobHandlerRegistry, JobQueue, ResultQueue, Worker, WorkerContext,
};
use db::MemoryStore;
use queue_core::{Job, JobEvent, JobFailure};
use tokio::sync::broadcast;

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Failures handed to the error notifier, as `(job id, message)`.
#[derive(Clone, Default)]
pub struct Notified(Arc<Mutex<Vec<(i64, String)>>>);

impl Notified {
    pub fn notifier(&self) -> impl Fn(&JobFailure, &Job) + Send + Sync + 'static {
        let seen = self.0.clone();
        move |failure: &JobFailure, job: &Job| {
            seen.lock()
                .unwrap()
                .push((job.id.get(), failure.message().to_string()));
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Handler that always succeeds.
pub fn ok_handler(
    job_class: &str,
) -> FnHandler<impl Fn(&Job) -> HandlerFuture + Send + Sync + 'static> {
    FnHandler::new(job_class, |_job: &Job| -> HandlerFuture { Box::pin(async { Ok(()) }) })
}

/// Handler that always fails with `message`.
pub fn failing_handler(
    job_class: &str,
    message: &'static str,
) -> FnHandler<impl Fn(&Job) -> HandlerFuture + Send + Sync + 'static> {
    FnHandler::new(job_class, move |_job: &Job| -> HandlerFuture {
        Box::pin(async move { Err(JobFailure::new(message)) })
    })
}

/// A worker over `store` that is driven with `Worker::work`.
pub fn worker(
    store: &MemoryStore,
    handlers: JobHandlerRegistry,
    context: impl FnOnce(WorkerContext<MemoryStore>) -> WorkerContext<MemoryStore>,
) -> Worker<MemoryStore> {
    let context = context(WorkerContext::new(Arc::new(store.clone()), Arc::new(handlers)));
    Worker::new(
        "test-worker",
        None,
        context,
        Arc::new(JobQueue::new(8)),
        Arc::new(ResultQueue::new()),
    )
}

/// Collect every event currently buffered on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Ids of `JobWorked` events in the order they were emitted.
pub fn worked_ids(events: &[JobEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|event| match event {
            JobEvent::JobWorked { job_id, .. } => Some(job_id.get()),
            _ => None,
        })
        .collect()
}
