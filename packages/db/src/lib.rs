//! Storage for the job queue system.
//!
//! Two `JobStore` implementations share one set of semantics:
//!
//! - [`SurrealStore`]: SurrealDB tables for jobs, advisory locks, lockers and notifications
//! - [`MemoryStore`]: an in-process table for tests and embedded use
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod memory_store;
pub mod repositories;
mod schema;
mod surreal_store;

pub use connection::{Database, DbConfig, DbError, connect};
pub use memory_store::MemoryStore;
pub use schema::init_schema;
pub use surreal_store::{DEFAULT_LOCKER_TTL, SurrealStore};

/// Connect to the configured database and create the schema.
///
/// This should be called once at application startup.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
