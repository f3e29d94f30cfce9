//! Advisory locks keyed by job id and owned by a session.

use std::collections::HashMap;

use queue_core::JobId;
use serde::Deserialize;
use surrealdb::sql::Thing;

use super::job_repo::job_id_of;
use crate::{Database, DbError};

/// Repository for the `job_lock` table.
///
/// The holder is bound as `$holder`: `$session` is reserved by SurrealDB.
#[derive(Clone)]
pub struct LockRepository {
    db: Database,
}

#[derive(Debug, Deserialize)]
struct LockRecord {
    id: Thing,
    session: String,
}

impl LockRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Take the lock for `id` unless another session holds it.
    ///
    /// Returns true when `session` holds the lock afterwards, including when it already did.
    pub async fn try_lock(&self, id: JobId, session: &str) -> Result<bool, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                INSERT IGNORE INTO job_lock { id: $id, session: $holder };
                SELECT VALUE session FROM type::thing('job_lock', $id);
                "#,
            )
            .bind(("id", id.get()))
            .bind(("holder", session.to_string()))
            .await?
            .check()?;

        let holders: Vec<String> = response.take(1)?;

        Ok(holders.first().is_some_and(|holder| holder == session))
    }

    /// Release the lock for `id` if `session` holds it.
    pub async fn unlock(&self, id: JobId, session: &str) -> Result<(), DbError> {
        self.db
            .query("DELETE type::thing('job_lock', $id) WHERE session = $holder")
            .bind(("id", id.get()))
            .bind(("holder", session.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Release every lock held by `session`.
    pub async fn unlock_all(&self, session: &str) -> Result<(), DbError> {
        self.db
            .query("DELETE job_lock WHERE session = $holder")
            .bind(("holder", session.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Current lock holders by job id.
    pub async fn holders(&self) -> Result<HashMap<JobId, String>, DbError> {
        let mut response = self.db.query("SELECT id, session FROM job_lock").await?;
        let records: Vec<LockRecord> = response.take(0)?;

        records
            .into_iter()
            .map(|record| Ok((job_id_of(&record.id)?, record.session)))
            .collect()
    }
}
