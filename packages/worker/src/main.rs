//! Job queue worker process.
//!
//! Connects to the database, starts one locker with the demo handlers and runs until Ctrl-C.

use std::str::FromStr;
use std::time::Duration;

use actors::{FnHandler, HandlerFuture, JobHandlerRegistry, Locker, LockerArgs};
use db::{DbConfig, SurrealStore};
use queue_core::{Job, JobFailure, JobStore, LockerConfig, NewJob, ResolveAction};
use tracing_subscriber::EnvFilter;

/// Read an environment variable, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", name, value);
            default
        }),
        Err(_) => default,
    }
}

fn locker_config() -> LockerConfig {
    let defaults = LockerConfig::default();
    let mut config = defaults
        .clone()
        .with_worker_count(env_or("QUEUE_WORKER_COUNT", defaults.worker_count))
        .with_poll_interval(Duration::from_millis(env_or(
            "QUEUE_POLL_INTERVAL_MS",
            defaults.poll_interval_ms,
        )))
        .with_heartbeat_interval(Duration::from_millis(env_or(
            "QUEUE_HEARTBEAT_INTERVAL_MS",
            defaults.heartbeat_interval_ms,
        )))
        .with_maximum_buffer_size(env_or("QUEUE_BUFFER_SIZE", defaults.maximum_buffer_size));

    if let Ok(names) = std::env::var("QUEUE_NAMES") {
        config = config.with_queues(
            names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        );
    }
    config
}

fn demo_handlers() -> JobHandlerRegistry {
    let mut handlers = JobHandlerRegistry::new();

    // Demo: Echo handler, keeps its row so it shows up as completed
    handlers.register(
        FnHandler::new("echo", |job: &Job| -> HandlerFuture {
            let args = job.args.clone();
            Box::pin(async move {
                tracing::info!("Echo job: {:?}", args);
                Ok(())
            })
        })
        .with_resolve_action(ResolveAction::Finish),
    );

    // Demo: Sleep handler
    handlers.register(FnHandler::new("sleep", |job: &Job| -> HandlerFuture {
        let seconds = job.args.first().and_then(|v| v.as_u64()).unwrap_or(5);
        Box::pin(async move {
            tracing::info!("Sleeping for {} seconds", seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            Ok(())
        })
    }));

    // Demo: Failing handler (for testing retries)
    handlers.register(
        FnHandler::new("fail", |job: &Job| -> HandlerFuture {
            let should_fail = job.args.first().and_then(|v| v.as_bool()).unwrap_or(true);
            Box::pin(async move {
                if should_fail {
                    Err(JobFailure::new("Intentional failure"))
                } else {
                    Ok(())
                }
            })
        })
        .with_maximum_retry_count(3),
    );

    handlers
}

/// Seed a few demo jobs into an empty store.
async fn seed_demo_jobs(store: &SurrealStore) -> Result<(), Box<dyn std::error::Error>> {
    if !store.job_views().await?.is_empty() {
        return Ok(());
    }

    tracing::info!("Creating demo jobs...");
    store
        .enqueue(NewJob::new("echo").with_args(vec![serde_json::json!("hello")]))
        .await?;
    store
        .enqueue(
            NewJob::new("sleep")
                .with_priority(50)
                .with_args(vec![serde_json::json!(1)]),
        )
        .await?;
    store.enqueue(NewJob::new("fail")).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Local development defaults to an in-memory database.
    let db_config = DbConfig::from_env();
    if db_config.is_memory() {
        tracing::warn!("QUEUE_DB_ENDPOINT not set, jobs will not outlive this process");
    }
    let database = db::init(&db_config).await?;
    let store = SurrealStore::new(database);

    seed_demo_jobs(&store).await?;

    let config = locker_config();
    tracing::info!(
        "Starting worker: {} workers on {:?}",
        config.worker_count,
        config.queues
    );

    let locker = Locker::start(
        LockerArgs::new(store.connect(), demo_handlers()).with_config(config),
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down locker {}", locker.locker_id());
    locker.stop().await?;

    Ok(())
}
