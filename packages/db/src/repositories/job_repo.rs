//! Job repository for row operations.

use chrono::{DateTime, Utc};
use queue_core::{CandidateQuery, FailureRecord, Job, JobId, NewJob};
use serde::Deserialize;
use surrealdb::sql::{Datetime, Id, Thing};

use crate::{Database, DbError};

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Internal record type for SurrealDB.
#[derive(Debug, Deserialize)]
pub(crate) struct JobRecord {
    id: Thing,
    queue: String,
    priority: i64,
    run_at: Datetime,
    first_run_at: Datetime,
    job_class: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
    #[serde(default)]
    error_count: i64,
    #[serde(default)]
    last_error_message: Option<String>,
    #[serde(default)]
    last_error_backtrace: Option<String>,
    #[serde(default)]
    finished_at: Option<Datetime>,
    #[serde(default)]
    expired_at: Option<Datetime>,
}

/// Extract the integer key of a `job:N` or `job_lock:N` record id.
pub(crate) fn job_id_of(thing: &Thing) -> Result<JobId, DbError> {
    match &thing.id {
        Id::Number(n) => Ok(JobId(*n)),
        other => Err(DbError::Serialization(format!(
            "Expected an integer record id, got {}:{}",
            thing.tb,
            other.to_raw()
        ))),
    }
}

pub(crate) fn to_datetime(value: Datetime) -> DateTime<Utc> {
    value.0
}

impl TryFrom<JobRecord> for Job {
    type Error = DbError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let priority = i16::try_from(record.priority).map_err(|_| {
            DbError::Serialization(format!("Priority out of range: {}", record.priority))
        })?;
        let error_count = i32::try_from(record.error_count).map_err(|_| {
            DbError::Serialization(format!("Error count out of range: {}", record.error_count))
        })?;

        Ok(Job {
            id: job_id_of(&record.id)?,
            queue: record.queue,
            priority,
            run_at: to_datetime(record.run_at),
            first_run_at: to_datetime(record.first_run_at),
            job_class: record.job_class,
            args: record.args,
            error_count,
            last_error_message: record.last_error_message,
            last_error_backtrace: record.last_error_backtrace,
            finished_at: record.finished_at.map(to_datetime),
            expired_at: record.expired_at.map(to_datetime),
        })
    }
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a job under the next id of the `counter:job` sequence.
    pub async fn create(&self, job: NewJob) -> Result<Job, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                LET $n = (UPSERT ONLY counter:job SET value = (value OR 0) + 1 RETURN VALUE value);
                CREATE ONLY type::thing('job', $n) CONTENT {
                    queue: $queue,
                    priority: $priority,
                    run_at: $run_at,
                    first_run_at: $run_at,
                    job_class: $job_class,
                    args: $args,
                    error_count: 0
                };
                "#,
            )
            .bind(("queue", job.queue))
            .bind(("priority", i64::from(job.priority)))
            .bind(("run_at", Datetime::from(job.run_at)))
            .bind(("job_class", job.job_class))
            .bind(("args", job.args))
            .await?
            .check()?;

        let record: Option<JobRecord> = response.take(1)?;

        record
            .ok_or_else(|| DbError::Query("Failed to create job".into()))?
            .try_into()
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing('job', $id)")
            .bind(("id", id.get()))
            .await?;

        let records: Vec<JobRecord> = response.take(0)?;

        records.into_iter().next().map(Job::try_from).transpose()
    }

    /// Every job row ordered by id.
    pub async fn list(&self) -> Result<Vec<Job>, DbError> {
        let mut response = self.db.query("SELECT * FROM job ORDER BY id ASC").await?;
        let records: Vec<JobRecord> = response.take(0)?;

        records.into_iter().map(Job::try_from).collect()
    }

    /// Pending, due rows that no session holds a lock on.
    pub async fn candidates(&self, query: &CandidateQuery) -> Result<Vec<Job>, DbError> {
        let priority_clause = if query.max_priority.is_some() {
            "AND priority <= $max_priority"
        } else {
            ""
        };

        let statement = format!(
            r#"
            LET $locked = (SELECT VALUE meta::id(id) FROM job_lock);
            SELECT * FROM job
            WHERE queue INSIDE $queues
                AND finished_at = NONE
                AND expired_at = NONE
                AND run_at <= $now
                {priority_clause}
                AND meta::id(id) NOTINSIDE $exclude
                AND meta::id(id) NOTINSIDE $locked
            ORDER BY priority ASC, run_at ASC, id ASC
            LIMIT $limit;
            "#
        );

        let exclude: Vec<i64> = query.exclude.iter().map(|id| id.get()).collect();

        let mut response = self
            .db
            .query(statement)
            .bind(("queues", query.queues.clone()))
            .bind(("now", Datetime::from(query.now)))
            .bind(("max_priority", query.max_priority.map(i64::from).unwrap_or_default()))
            .bind(("exclude", exclude))
            .bind(("limit", query.limit as i64))
            .await?
            .check()?;

        let records: Vec<JobRecord> = response.take(1)?;

        records.into_iter().map(Job::try_from).collect()
    }

    /// Delete a job.
    pub async fn delete(&self, id: JobId) -> Result<(), DbError> {
        self.db
            .query("DELETE type::thing('job', $id)")
            .bind(("id", id.get()))
            .await?
            .check()?;

        Ok(())
    }

    /// Stamp `finished_at` and keep the row.
    pub async fn finish(&self, id: JobId) -> Result<(), DbError> {
        self.db
            .query("UPDATE type::thing('job', $id) SET finished_at = time::now()")
            .bind(("id", id.get()))
            .await?
            .check()?;

        Ok(())
    }

    /// Record a failure and move `run_at` forward.
    pub async fn retry(&self, id: JobId, failure: FailureRecord) -> Result<(), DbError> {
        self.db
            .query(
                r#"
                UPDATE type::thing('job', $id) SET
                    error_count = $error_count,
                    run_at = $run_at,
                    last_error_message = $message,
                    last_error_backtrace = $backtrace
                "#,
            )
            .bind(("id", id.get()))
            .bind(("error_count", i64::from(failure.error_count)))
            .bind(("run_at", Datetime::from(failure.run_at)))
            .bind(("message", failure.message))
            .bind(("backtrace", failure.backtrace))
            .await?
            .check()?;

        Ok(())
    }

    /// Record a failure and stamp `expired_at`.
    pub async fn expire(&self, id: JobId, failure: FailureRecord) -> Result<(), DbError> {
        self.db
            .query(
                r#"
                UPDATE type::thing('job', $id) SET
                    error_count = $error_count,
                    expired_at = time::now(),
                    last_error_message = $message,
                    last_error_backtrace = $backtrace
                "#,
            )
            .bind(("id", id.get()))
            .bind(("error_count", i64::from(failure.error_count)))
            .bind(("message", failure.message))
            .bind(("backtrace", failure.backtrace))
            .await?
            .check()?;

        Ok(())
    }

    /// Overwrite the last error fields only.
    pub async fn record_error(
        &self,
        id: JobId,
        message: String,
        backtrace: String,
    ) -> Result<(), DbError> {
        self.db
            .query(
                r#"
                UPDATE type::thing('job', $id) SET
                    last_error_message = $message,
                    last_error_backtrace = $backtrace
                "#,
            )
            .bind(("id", id.get()))
            .bind(("message", message))
            .bind(("backtrace", backtrace))
            .await?
            .check()?;

        Ok(())
    }
}
