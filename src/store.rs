// ABOUTME: SQLite-backed storage shared across features.
// ABOUTME: Features register typed namespace APIs here during load.

use anyhow::{Context as _, Result};
use rusqlite::Connection;
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared database handle plus the namespace registry features publish
/// their storage APIs into.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    namespaces: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        Ok(Self::from_connection(conn))
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for namespace APIs to run their own queries with.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Publish a storage API under `namespace`. Re-registering a namespace
    /// overwrites the previous API and logs a warning.
    pub fn register(&self, namespace: &str, api: Arc<dyn Any + Send + Sync>) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .lock()
            .map_err(|e| anyhow::anyhow!("Store registry mutex poisoned: {}", e))?;
        if namespaces.insert(namespace.to_string(), api).is_some() {
            tracing::warn!(namespace = %namespace, "Storage namespace already registered, overwriting");
        }
        Ok(())
    }

    /// Fetch the API registered under `namespace`, downcast to `T`.
    pub fn get<T: Send + Sync + 'static>(&self, namespace: &str) -> Result<Arc<T>> {
        let namespaces = self
            .namespaces
            .lock()
            .map_err(|e| anyhow::anyhow!("Store registry mutex poisoned: {}", e))?;
        let api = namespaces
            .get(namespace)
            .with_context(|| format!("No storage API registered under namespace '{}'", namespace))?;
        Arc::clone(api)
            .downcast::<T>()
            .map_err(|_| anyhow::anyhow!("Storage namespace '{}' holds a different type", namespace))
    }
}
