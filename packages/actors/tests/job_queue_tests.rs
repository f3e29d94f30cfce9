mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{JobKey, JobQueue, QueueEntry, ResultQueue};
use chrono::{DateTime, TimeZone, Utc};
use queue_core::{JobId, NewJob};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap_or_else(Utc::now)
}

fn entry(id: i64, priority: i16, run_at: DateTime<Utc>) -> QueueEntry {
    QueueEntry::from(
        NewJob::new("Test")
            .with_priority(priority)
            .with_run_at(run_at)
            .into_job(JobId(id)),
    )
}

fn ids(entries: &[QueueEntry]) -> Vec<i64> {
    entries.iter().map(|e| e.id().get()).collect()
}

#[tokio::test]
async fn pops_in_priority_run_at_id_order() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(8);
    let evicted = queue.push([
        entry(1, 20, at(0)),
        entry(2, 10, at(5)),
        entry(3, 10, at(1)),
        entry(4, 10, at(1)),
    ]);
    assert!(evicted.is_empty());

    let order: Vec<JobKey> = queue.to_vec();
    assert_eq!(
        order.iter().map(|k| k.id.get()).collect::<Vec<_>>(),
        vec![3, 4, 2, 1]
    );

    let mut popped = Vec::new();
    while let Some(entry) = queue.try_pop(None) {
        popped.push(entry.id().get());
    }
    assert_eq!(popped, vec![3, 4, 2, 1]);
    assert!(queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn overflow_evicts_the_worst_entries() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(3);
    assert!(queue.push([entry(1, 5, at(0)), entry(2, 7, at(0))]).is_empty());
    assert_eq!(queue.space(), 1);

    let evicted = queue.push([entry(3, 1, at(0)), entry(4, 9, at(0)), entry(5, 6, at(0))]);
    assert_eq!(ids(&evicted), vec![4, 2]);
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.space(), 0);
    assert_eq!(queue.lowest_priority(), Some(6));

    assert!(queue.accepts(&JobKey {
        priority: 5,
        run_at: at(1),
        id: JobId(10),
    }));
    assert!(!queue.accepts(&JobKey {
        priority: 6,
        run_at: at(1),
        id: JobId(10),
    }));
    Ok(())
}

#[tokio::test]
async fn threshold_holds_back_low_priority_entries() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(JobQueue::new(8));
    queue.push([entry(1, 50, at(0))]);

    assert!(queue.try_pop(Some(10)).is_none());

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.pop(Some(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    queue.push([entry(2, 10, at(0))]);
    let popped = tokio::time::timeout(Duration::from_secs(1), waiter).await??;
    assert_eq!(popped.map(|e| e.id().get()), Some(2));

    // The low priority entry is still there for an unrestricted worker.
    assert_eq!(queue.pop(None).await.map(|e| e.id().get()), Some(1));
    Ok(())
}

#[tokio::test]
async fn stop_wakes_every_waiter() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(JobQueue::new(2));
    let waiters: Vec<_> = (0..3)
        .map(|i| {
            let queue = queue.clone();
            let threshold = if i == 0 { None } else { Some(10) };
            tokio::spawn(async move { queue.pop(threshold).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.stop();
    for waiter in waiters {
        let popped = tokio::time::timeout(Duration::from_secs(1), waiter).await??;
        assert!(popped.is_none());
    }

    assert!(queue.is_stopped());
    assert!(queue.pop(None).await.is_none());

    // A stopped queue hands every pushed entry straight back.
    let evicted = queue.push([entry(1, 1, at(0))]);
    assert_eq!(ids(&evicted), vec![1]);
    assert!(queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn clear_returns_resident_entries() -> Result<(), Box<dyn Error>> {
    let queue = JobQueue::new(4);
    queue.push([entry(2, 1, at(0)), entry(1, 2, at(0))]);

    let cleared = queue.clear();
    assert_eq!(ids(&cleared), vec![2, 1]);
    assert!(queue.is_empty());
    assert_eq!(queue.space(), 4);
    Ok(())
}

#[tokio::test]
async fn result_queue_drains_once() -> Result<(), Box<dyn Error>> {
    let results = Arc::new(ResultQueue::new());

    results.push(JobId(1));
    results.push_all([JobId(2), JobId(3)]);
    assert_eq!(results.len(), 3);
    assert_eq!(results.to_vec(), vec![JobId(1), JobId(2), JobId(3)]);

    assert_eq!(results.drain(), vec![JobId(1), JobId(2), JobId(3)]);
    assert!(results.drain().is_empty());
    assert!(results.is_empty());

    // A push made before anyone waits is not lost.
    results.push(JobId(4));
    tokio::time::timeout(Duration::from_secs(1), results.notified()).await?;

    let waiter = {
        let results = results.clone();
        tokio::spawn(async move { results.notified().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    results.push(JobId(5));
    tokio::time::timeout(Duration::from_secs(1), waiter).await??;
    assert_eq!(results.drain(), vec![JobId(4), JobId(5)]);
    Ok(())
}

#[tokio::test]
async fn concurrent_workers_take_each_entry_once() -> Result<(), Box<dyn Error>> {
    let queue = Arc::new(JobQueue::new(100));
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(entry) = queue.pop(None).await {
                    taken.push(entry.id().get());
                }
                taken
            })
        })
        .collect();

    for chunk in (1..=60).collect::<Vec<i64>>().chunks(6) {
        queue.push(chunk.iter().map(|&id| entry(id, (id % 5) as i16, at(id))));
        tokio::task::yield_now().await;
    }
    assert!(common::wait_for(Duration::from_secs(2), || std::future::ready(queue.is_empty())).await);
    queue.stop();

    let mut all = Vec::new();
    for consumer in consumers {
        all.extend(consumer.await?);
    }
    all.sort();
    assert_eq!(all, (1..=60).collect::<Vec<i64>>());
    Ok(())
}
