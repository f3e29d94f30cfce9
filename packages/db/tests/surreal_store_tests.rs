mod common;

use std::error::Error;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use queue_core::{CandidateQuery, FailureRecord, JobId, JobState, JobStore, LockerRecord, NewJob};

fn default_queues() -> Vec<String> {
    vec!["default".to_string()]
}

#[tokio::test]
async fn enqueue_and_get_round_trip_the_row() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;

    let job = store
        .enqueue(
            NewJob::new("SendEmail")
                .with_priority(7)
                .with_args(vec![serde_json::json!({"to": "a@b.c"}), serde_json::json!(3)]),
        )
        .await?;
    let next = store.enqueue(NewJob::new("SendEmail")).await?;

    assert_eq!(job.id, JobId(1));
    assert_eq!(next.id, JobId(2));

    let loaded = store.get_job(job.id).await?.ok_or("missing row")?;
    assert_eq!(loaded.job_class, "SendEmail");
    assert_eq!(loaded.priority, 7);
    assert_eq!(loaded.args.len(), 2);
    assert_eq!(loaded.error_count, 0);
    assert!(loaded.is_pending());

    assert!(store.get_job(JobId(99)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn candidates_skip_locked_future_and_other_queues() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let other = store.connect();

    let third = store.enqueue(NewJob::new("A").with_priority(3)).await?;
    let first = store.enqueue(NewJob::new("A").with_priority(1)).await?;
    let second = store.enqueue(NewJob::new("A").with_priority(2)).await?;
    store
        .enqueue(NewJob::new("A").with_priority(1).with_queue("other"))
        .await?;
    store
        .enqueue(
            NewJob::new("A")
                .with_priority(1)
                .with_run_at(Utc::now() + chrono::Duration::hours(1)),
        )
        .await?;

    let ids: Vec<JobId> = store
        .select_candidates(CandidateQuery::new(default_queues(), 10))
        .await?
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(ids, vec![first.id, second.id, third.id]);

    assert!(other.try_advisory_lock(first.id).await?);
    let ids: Vec<JobId> = store
        .select_candidates(CandidateQuery::new(default_queues(), 10).with_max_priority(Some(2)))
        .await?
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(ids, vec![second.id]);
    Ok(())
}

#[tokio::test]
async fn advisory_locks_belong_to_one_session() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let other = store.connect();
    let job = store.enqueue(NewJob::new("A")).await?;

    assert!(store.try_advisory_lock(job.id).await?);
    assert!(store.try_advisory_lock(job.id).await?);
    assert!(!other.try_advisory_lock(job.id).await?);

    other.advisory_unlock(job.id).await?;
    assert_eq!(store.locked_ids().await?, vec![job.id]);

    store.advisory_unlock(job.id).await?;
    store.advisory_unlock(job.id).await?;
    assert!(store.locked_ids().await?.is_empty());
    assert!(other.try_advisory_lock(job.id).await?);
    Ok(())
}

#[tokio::test]
async fn failures_and_finish_are_reflected_in_views() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let retried = store.enqueue(NewJob::new("A")).await?;
    let expired = store.enqueue(NewJob::new("A")).await?;
    let finished = store.enqueue(NewJob::new("A")).await?;
    let running = store.enqueue(NewJob::new("A")).await?;
    let later = Utc::now() + chrono::Duration::seconds(30);

    store
        .retry(
            retried.id,
            FailureRecord {
                error_count: 1,
                run_at: later,
                message: "boom".to_string(),
                backtrace: "here".to_string(),
            },
        )
        .await?;
    store
        .expire(
            expired.id,
            FailureRecord {
                error_count: 16,
                run_at: later,
                message: "gone".to_string(),
                backtrace: "there".to_string(),
            },
        )
        .await?;
    store.finish(finished.id).await?;
    assert!(store.try_advisory_lock(running.id).await?);

    let row = store.get_job(retried.id).await?.ok_or("missing row")?;
    assert_eq!(row.error_count, 1);
    assert_eq!(row.last_error_message.as_deref(), Some("boom"));
    assert!(row.run_at > Utc::now());

    store
        .record_error(finished.id, "noted".to_string(), "trace".to_string())
        .await?;
    let row = store.get_job(finished.id).await?.ok_or("missing row")?;
    assert_eq!(row.error_count, 0);
    assert_eq!(row.last_error_message.as_deref(), Some("noted"));

    let views = store.job_views().await?;
    let state_of = |id: JobId| views.iter().find(|v| v.job.id == id).map(|v| v.state);
    assert_eq!(state_of(retried.id), Some(JobState::Errored));
    assert_eq!(state_of(expired.id), Some(JobState::Failed));
    assert_eq!(state_of(finished.id), Some(JobState::Completed));
    assert_eq!(state_of(running.id), Some(JobState::Running));

    store.destroy(expired.id).await?;
    assert!(store.get_job(expired.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn live_notifications_reach_listeners() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let mut notifications = store.connect().listen().await?;

    let job = store.enqueue(NewJob::new("A").with_priority(4)).await?;

    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.next())
        .await?
        .ok_or("stream ended")?;
    assert_eq!(notification.id, job.id);
    assert_eq!(notification.priority, 4);
    Ok(())
}

#[tokio::test]
async fn lockers_register_and_unregister() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let job = store.enqueue(NewJob::new("A")).await?;
    let now = Utc::now();
    let id = store.session_id().to_string();

    store
        .register_locker(LockerRecord {
            id: id.clone(),
            pid: std::process::id(),
            worker_count: 2,
            worker_priorities: vec![Some(10), None],
            queues: default_queues(),
            listening: true,
            started_at: now,
            heartbeat_at: now,
        })
        .await?;
    store.heartbeat_locker(&id).await?;
    assert!(store.try_advisory_lock(job.id).await?);

    let lockers = store.lockers().await?;
    assert_eq!(lockers.len(), 1);
    assert_eq!(lockers[0].id, id);
    assert_eq!(lockers[0].worker_priorities, vec![Some(10), None]);

    store.unregister_locker(&id).await?;
    assert!(store.lockers().await?.is_empty());
    assert!(store.locked_ids().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn stale_lockers_are_reaped_on_register() -> Result<(), Box<dyn Error>> {
    let store = common::setup_store().await?;
    let crashed = store.connect();
    let job = store.enqueue(NewJob::new("A")).await?;
    let long_ago = Utc::now() - chrono::Duration::hours(1);

    crashed
        .register_locker(LockerRecord {
            id: crashed.session_id().to_string(),
            pid: 1,
            worker_count: 1,
            worker_priorities: vec![None],
            queues: default_queues(),
            listening: false,
            started_at: long_ago,
            heartbeat_at: long_ago,
        })
        .await?;
    assert!(crashed.try_advisory_lock(job.id).await?);

    let now = Utc::now();
    store
        .register_locker(LockerRecord {
            id: store.session_id().to_string(),
            pid: 2,
            worker_count: 1,
            worker_priorities: vec![None],
            queues: default_queues(),
            listening: false,
            started_at: now,
            heartbeat_at: now,
        })
        .await?;

    assert_eq!(store.lockers().await?.len(), 1);
    assert!(store.locked_ids().await?.is_empty());
    assert!(store.try_advisory_lock(job.id).await?);
    Ok(())
}

async fn notification_ids(db: &db::Database) -> Result<Vec<i64>, Box<dyn Error>> {
    let mut response = db.query("SELECT VALUE job_id FROM job_notification").await?;
    Ok(response.take(0)?)
}

#[tokio::test]
async fn heartbeats_reap_crashed_lockers_and_prune_notifications() -> Result<(), Box<dyn Error>> {
    let db = db::init(&db::DbConfig::memory()).await?;
    let store = db::SurrealStore::new(db.clone()).with_locker_ttl(Duration::from_millis(200));
    let crashed = store.connect();
    let now = Utc::now();

    for session in [&store, &crashed] {
        session
            .register_locker(LockerRecord {
                id: session.session_id().to_string(),
                pid: 1,
                worker_count: 1,
                worker_priorities: vec![None],
                queues: default_queues(),
                listening: true,
                started_at: now,
                heartbeat_at: now,
            })
            .await?;
    }

    let job = store.enqueue(NewJob::new("A")).await?;
    store.enqueue(NewJob::new("B")).await?;
    assert!(crashed.try_advisory_lock(job.id).await?);

    assert_eq!(notification_ids(&db).await?.len(), 2);

    // Only the live session keeps beating.
    tokio::time::sleep(Duration::from_millis(300)).await;
    store.heartbeat_locker(store.session_id()).await?;

    let lockers = store.lockers().await?;
    assert_eq!(lockers.len(), 1);
    assert_eq!(lockers[0].id, store.session_id());
    assert!(store.locked_ids().await?.is_empty());
    assert!(store.try_advisory_lock(job.id).await?);
    assert!(notification_ids(&db).await?.is_empty());
    Ok(())
}
