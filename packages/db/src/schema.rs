//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    // Job table
    db.query(JOB_SCHEMA).await?.check()?;

    // Advisory locks, locker registrations and notifications
    db.query(LOCK_SCHEMA).await?.check()?;
    db.query(LOCKER_SCHEMA).await?.check()?;
    db.query(NOTIFICATION_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema. Record ids are integers handed out by `counter:job`.
const JOB_SCHEMA: &str = r#"
-- Job table for pending, finished and expired jobs
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS queue ON job TYPE string;
DEFINE FIELD IF NOT EXISTS priority ON job TYPE int;
DEFINE FIELD IF NOT EXISTS run_at ON job TYPE datetime;
DEFINE FIELD IF NOT EXISTS first_run_at ON job TYPE datetime;
DEFINE FIELD IF NOT EXISTS job_class ON job TYPE string;
DEFINE FIELD IF NOT EXISTS args ON job TYPE array DEFAULT [];
DEFINE FIELD IF NOT EXISTS error_count ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS last_error_message ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS last_error_backtrace ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS finished_at ON job TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS expired_at ON job TYPE option<datetime>;

-- Compound index for candidate polling
DEFINE INDEX IF NOT EXISTS job_poll ON job FIELDS queue, priority, run_at;

-- Id sequence
DEFINE TABLE IF NOT EXISTS counter SCHEMALESS;
"#;

/// Advisory lock table. A lock's record id is the job id.
const LOCK_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_lock SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS session ON job_lock TYPE string;
DEFINE FIELD IF NOT EXISTS locked_at ON job_lock TYPE datetime DEFAULT time::now();

DEFINE INDEX IF NOT EXISTS job_lock_session ON job_lock FIELDS session;
"#;

/// Locker registration table, keyed by session id.
const LOCKER_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS locker SCHEMALESS;

DEFINE FIELD IF NOT EXISTS pid ON locker TYPE int;
DEFINE FIELD IF NOT EXISTS worker_count ON locker TYPE int;
DEFINE FIELD IF NOT EXISTS queues ON locker TYPE array<string>;
DEFINE FIELD IF NOT EXISTS listening ON locker TYPE bool;
DEFINE FIELD IF NOT EXISTS started_at ON locker TYPE datetime;
DEFINE FIELD IF NOT EXISTS heartbeat_at ON locker TYPE datetime;
"#;

/// Notification channel, consumed through live queries.
const NOTIFICATION_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_notification SCHEMALESS;

DEFINE FIELD IF NOT EXISTS created_at ON job_notification TYPE datetime DEFAULT time::now();
"#;
