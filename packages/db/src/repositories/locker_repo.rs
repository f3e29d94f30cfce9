//! Locker registration repository.

use std::time::Duration;

use queue_core::LockerRecord;
use serde::Deserialize;
use surrealdb::sql::{Datetime, Thing};

use super::job_repo::to_datetime;
use crate::{Database, DbError};

/// Repository for the `locker` table.
#[derive(Clone)]
pub struct LockerRepository {
    db: Database,
}

#[derive(Debug, Deserialize)]
struct LockerRow {
    id: Thing,
    pid: i64,
    worker_count: i64,
    #[serde(default)]
    worker_priorities: Vec<Option<i64>>,
    queues: Vec<String>,
    listening: bool,
    started_at: Datetime,
    heartbeat_at: Datetime,
}

impl From<LockerRow> for LockerRecord {
    fn from(row: LockerRow) -> Self {
        Self {
            id: row.id.id.to_raw(),
            pid: u32::try_from(row.pid).unwrap_or_default(),
            worker_count: usize::try_from(row.worker_count).unwrap_or_default(),
            worker_priorities: row
                .worker_priorities
                .into_iter()
                .map(|p| p.and_then(|p| i16::try_from(p).ok()))
                .collect(),
            queues: row.queues,
            listening: row.listening,
            started_at: to_datetime(row.started_at),
            heartbeat_at: to_datetime(row.heartbeat_at),
        }
    }
}

impl LockerRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Remove lockers whose heartbeat is older than `ttl`, along with their locks.
    pub async fn reap_stale(&self, ttl: Duration) -> Result<(), DbError> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);

        self.db
            .query(
                r#"
                LET $stale = (SELECT VALUE meta::id(id) FROM locker WHERE heartbeat_at < $cutoff);
                DELETE job_lock WHERE session INSIDE $stale;
                DELETE locker WHERE meta::id(id) INSIDE $stale;
                DELETE job_notification WHERE created_at < $cutoff;
                "#,
            )
            .bind(("cutoff", Datetime::from(cutoff)))
            .await?
            .check()?;

        Ok(())
    }

    /// Insert or replace a registration.
    pub async fn upsert(&self, record: LockerRecord) -> Result<(), DbError> {
        let priorities: Vec<Option<i64>> = record
            .worker_priorities
            .iter()
            .map(|p| p.map(i64::from))
            .collect();

        self.db
            .query(
                r#"
                UPSERT type::thing('locker', $id) CONTENT {
                    pid: $pid,
                    worker_count: $worker_count,
                    worker_priorities: $worker_priorities,
                    queues: $queues,
                    listening: $listening,
                    started_at: $started_at,
                    heartbeat_at: $heartbeat_at
                }
                "#,
            )
            .bind(("id", record.id))
            .bind(("pid", i64::from(record.pid)))
            .bind(("worker_count", record.worker_count as i64))
            .bind(("worker_priorities", priorities))
            .bind(("queues", record.queues))
            .bind(("listening", record.listening))
            .bind(("started_at", Datetime::from(record.started_at)))
            .bind(("heartbeat_at", Datetime::from(record.heartbeat_at)))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn heartbeat(&self, id: &str) -> Result<(), DbError> {
        self.db
            .query("UPDATE type::thing('locker', $id) SET heartbeat_at = time::now()")
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), DbError> {
        self.db
            .query("DELETE type::thing('locker', $id)")
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Every registered locker.
    pub async fn list(&self) -> Result<Vec<LockerRecord>, DbError> {
        let mut response = self.db.query("SELECT * FROM locker").await?;
        let rows: Vec<LockerRow> = response.take(0)?;

        Ok(rows.into_iter().map(LockerRecord::from).collect())
    }
}
