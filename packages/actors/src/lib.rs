//! Actor system for the job queue.
//!
//! This crate provides the in-process half of the queue: the locker that claims jobs from
//! a [`JobStore`](queue_core::JobStore), the bounded job queue it fills, and the workers
//! that drain it.
//!
//! # Architecture
//!
//! - `LockerActor` - Polls and listens for jobs, holds their advisory locks
//! - `JobQueue` - Bounded priority buffer of claimed jobs
//! - `WorkerPool` / `Worker` - Execute jobs, retry or expire failures
//! - `ResultQueue` - Worked job ids handed back to the locker for unlocking
//!
//! # Usage
//!
//! ```ignore
//! use actors::{JobHandlerRegistry, Locker, LockerArgs};
//! use db::MemoryStore;
//!
//! let locker = Locker::start(LockerArgs::new(MemoryStore::new(), JobHandlerRegistry::new())).await?;
//! // ...
//! locker.stop().await?;
//! ```

mod handler;
mod job_queue;
mod locker;
mod messages;
mod notifier;
mod pool;
mod result_queue;
mod worker;

pub use handler::{ErrorHook, FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry};
pub use job_queue::{JobKey, JobQueue, QueueEntry};
pub use locker::{Locker, LockerActor, LockerArgs, LockerState};
pub use messages::{LockerError, LockerInfo, LockerMessage};
pub use notifier::{ErrorNotifier, LogNotifier};
pub use pool::WorkerPool;
pub use result_queue::ResultQueue;
pub use worker::{WorkOutcome, Worker, WorkerContext};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
