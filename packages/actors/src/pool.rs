//! A fixed set of workers sharing one job queue and one result queue.

use std::sync::Arc;

use queue_core::JobStore;
use tokio::task::JoinHandle;

use crate::job_queue::JobQueue;
use crate::result_queue::ResultQueue;
use crate::worker::{Worker, WorkerContext};

/// Owns the worker tasks of one locker.
pub struct WorkerPool {
    job_queue: Arc<JobQueue>,
    result_queue: Arc<ResultQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(job_queue: Arc<JobQueue>, result_queue: Arc<ResultQueue>) -> Self {
        Self {
            job_queue,
            result_queue,
            workers: Vec::new(),
        }
    }

    /// Spawn `count` workers. Worker `i` takes jobs up to `priorities[i]`, or any job when
    /// the slice is shorter.
    pub fn start<S: JobStore>(
        &mut self,
        context: WorkerContext<S>,
        count: usize,
        priorities: &[Option<i16>],
    ) {
        for i in 0..count {
            let priority = priorities.get(i).copied().flatten();
            let worker = Worker::new(
                format!("worker-{}", self.workers.len() + 1),
                priority,
                context.clone(),
                self.job_queue.clone(),
                self.result_queue.clone(),
            );
            self.workers.push(tokio::spawn(worker.run()));
        }
    }

    /// Number of started workers.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop the job queue and wait for every worker to finish its current job.
    pub async fn stop(&mut self) {
        self.job_queue.stop();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Worker task failed: {}", e);
            }
        }
    }
}
