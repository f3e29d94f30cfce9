use db::{DbConfig, DbError, SurrealStore};

/// A fresh in-memory database with the schema applied. Every call gets its own datastore.
pub async fn setup_store() -> Result<SurrealStore, DbError> {
    let db = db::init(&DbConfig::memory()).await?;
    Ok(SurrealStore::new(db))
}
