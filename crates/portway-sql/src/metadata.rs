//! Column metadata cache.
//!
//! Typed parameter binding needs the backend's column types; they load on
//! first use through the executor's catalog query and stay cached per
//! environment and endpoint. Registry change events invalidate lazily — the
//! next request reloads. Loads for one endpoint serialize on a per-key
//! mutex; readers never wait on a loader.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use portway_events::{Event, EventBus};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SqlResult;
use crate::executor::SqlExecutor;

/// One column's catalog description.
#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    /// Column name as the backend reports it.
    pub name: String,
    /// Declared SQL type.
    pub sql_type: String,
    /// Whether the column admits NULL.
    pub is_nullable: bool,
}

/// Columns keyed by lowercase name.
pub type ColumnMap = HashMap<String, ColumnMetadata>;

/// Cache of column metadata keyed by environment and endpoint.
pub struct MetadataCache {
    columns: RwLock<HashMap<String, Arc<ColumnMap>>>,
    loaders: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MetadataCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            columns: RwLock::new(HashMap::new()),
            loaders: Mutex::new(HashMap::new()),
        }
    }

    /// Cached columns for an endpoint, loading through the executor on miss.
    ///
    /// # Errors
    ///
    /// Propagates the executor's catalog query failure.
    pub async fn get_or_load(
        &self,
        environment: &str,
        endpoint: &str,
        schema: &str,
        object: &str,
        executor: &dyn SqlExecutor,
    ) -> SqlResult<Arc<ColumnMap>> {
        let key = cache_key(environment, endpoint);
        if let Some(cached) = self.read_guard().get(&key) {
            return Ok(cached.clone());
        }

        let loader = self.loader_for(&key).await;
        let _held = loader.lock().await;
        // A concurrent loader may have filled the entry while we waited.
        if let Some(cached) = self.read_guard().get(&key) {
            return Ok(cached.clone());
        }

        let columns = executor.column_metadata(schema, object).await?;
        let map: ColumnMap = columns
            .into_iter()
            .map(|column| (column.name.to_ascii_lowercase(), column))
            .collect();
        let shared = Arc::new(map);
        self.write_guard().insert(key, shared.clone());
        Ok(shared)
    }

    /// Drop every environment's entry for an endpoint.
    pub fn invalidate_endpoint(&self, endpoint: &str) {
        let suffix = format!(":{}", endpoint.to_ascii_lowercase());
        self.write_guard().retain(|key, _| !key.ends_with(&suffix));
        debug!(endpoint, "column metadata invalidated");
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        self.write_guard().clear();
    }

    /// Subscribe to registry changes and invalidate affected entries.
    pub fn spawn_invalidator(self: &Arc<Self>, bus: &EventBus) {
        let cache = Arc::clone(self);
        let mut feed = bus.subscribe();
        tokio::spawn(async move {
            while let Some(envelope) = feed.next().await {
                match envelope.event {
                    Event::EndpointChanged { name, .. } => cache.invalidate_endpoint(&name),
                    Event::EnvironmentChanged { .. } => cache.invalidate_all(),
                }
            }
        });
    }

    async fn loader_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut loaders = self.loaders.lock().await;
        loaders
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ColumnMap>>> {
        self.columns.read().unwrap_or_else(|err| {
            panic!("failed to lock metadata cache for read: {err}");
        })
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ColumnMap>>> {
        self.columns.write().unwrap_or_else(|err| {
            panic!("failed to lock metadata cache for write: {err}");
        })
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(environment: &str, endpoint: &str) -> String {
    format!(
        "{}:{}",
        environment.to_ascii_lowercase(),
        endpoint.to_ascii_lowercase()
    )
}
