//! Database connection settings and setup.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection handle. Clones share one connection and one datastore.
pub type Database = Surreal<Any>;

const MEMORY_ENDPOINT: &str = "mem://";

/// Where the job tables live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// `mem://`, `file://path`, `rocksdb://path` or a remote `ws://` / `http://` endpoint.
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Root user and password, signed in before selecting the namespace.
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: MEMORY_ENDPOINT.to_string(),
            namespace: "queue".to_string(),
            database: "jobs".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Embedded in-memory datastore. Nothing survives the process.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Embedded datastore persisted under `path`.
    pub fn file(path: impl AsRef<str>) -> Self {
        Self::endpoint(format!("file://{}", path.as_ref()))
    }

    /// Embedded RocksDB datastore (needs the `rocksdb` feature).
    pub fn rocksdb(path: impl AsRef<str>) -> Self {
        Self::endpoint(format!("rocksdb://{}", path.as_ref()))
    }

    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Build a config from `QUEUE_DB_*` variables, using defaults for the ones not set.
    ///
    /// Reads `QUEUE_DB_ENDPOINT`, `QUEUE_DB_NAMESPACE`, `QUEUE_DB_DATABASE`, and
    /// `QUEUE_DB_USER` with `QUEUE_DB_PASS` (credentials need both).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = lookup("QUEUE_DB_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(namespace) = lookup("QUEUE_DB_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(database) = lookup("QUEUE_DB_DATABASE") {
            config.database = database;
        }
        if let (Some(user), Some(pass)) = (lookup("QUEUE_DB_USER"), lookup("QUEUE_DB_PASS")) {
            config.credentials = Some((user, pass));
        }
        config
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), pass.into()));
        self
    }

    /// Whether every `connect` call opens a private, empty datastore.
    pub fn is_memory(&self) -> bool {
        self.endpoint == MEMORY_ENDPOINT
    }
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Connect, sign in when credentials are set, and select the namespace and database.
///
/// With a `mem://` endpoint each call creates its own datastore; share one [`Database`] by
/// cloning it.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    let db = connect_any(config.endpoint.as_str()).await?;

    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }
    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to {} ({}/{})",
        config.endpoint,
        config.namespace,
        config.database
    );
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("QUEUE_DB_ENDPOINT", "ws://db:8000"),
            ("QUEUE_DB_DATABASE", "staging"),
            ("QUEUE_DB_USER", "root"),
        ]
        .into_iter()
        .collect();
        let config = DbConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.endpoint, "ws://db:8000");
        assert_eq!(config.namespace, "queue");
        assert_eq!(config.database, "staging");
        // A user without a password is ignored.
        assert_eq!(config.credentials, None);
        assert!(!config.is_memory());
    }

    #[test]
    fn constructors() {
        assert!(DbConfig::memory().is_memory());
        assert_eq!(DbConfig::file("/tmp/q").endpoint, "file:///tmp/q");
        assert_eq!(DbConfig::rocksdb("data").endpoint, "rocksdb://data");
        assert_eq!(
            DbConfig::memory().with_credentials("u", "p").credentials,
            Some(("u".to_string(), "p".to_string()))
        );
    }
}
