//! Shared application state for the HTTP layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use portway_auth::{AuditWriter, TokenStore};
use portway_cache::{CacheProvider, FailoverCacheProvider};
use portway_config::{
    EndpointRegistry, Environment, EnvironmentRegistry, GatewaySettings,
};
use portway_files::FileService;
use portway_proxy::ProxyEngine;
use portway_sql::{SqlError, SqlEngine, SqlExecutor, SqlResult, SqliteExecutor};
use sha2::{Digest, Sha256};

use crate::rate_limit::{BucketConfig, RateLimiter};

/// Creates a SQL executor for an environment's connection string.
///
/// The embedded deployment ships a SQLite factory; other backends plug in
/// through this seam without touching the dispatch path.
#[async_trait]
pub trait SqlExecutorFactory: Send + Sync {
    /// Build an executor bound to the environment's backend.
    async fn create(&self, environment: &Environment) -> SqlResult<Arc<dyn SqlExecutor>>;
}

/// Factory for the embedded SQLite executor.
pub struct SqliteExecutorFactory {
    command_timeout: Duration,
}

impl SqliteExecutorFactory {
    /// Factory applying the configured command timeout.
    #[must_use]
    pub const fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    /// Extract the database path from a connection string.
    ///
    /// Accepts `sqlite:{path}`, `Data Source={path};…`, or a bare path.
    fn database_path(connection_string: &str) -> Option<String> {
        let trimmed = connection_string.trim();
        if let Some(path) = trimmed.strip_prefix("sqlite:") {
            return Some(path.trim_start_matches("//").to_string());
        }
        for segment in trimmed.split(';') {
            if let Some((key, value)) = segment.split_once('=')
                && key.trim().eq_ignore_ascii_case("data source")
            {
                return Some(value.trim().to_string());
            }
        }
        if trimmed.contains('=') {
            return None;
        }
        Some(trimmed.to_string())
    }
}

#[async_trait]
impl SqlExecutorFactory for SqliteExecutorFactory {
    async fn create(&self, environment: &Environment) -> SqlResult<Arc<dyn SqlExecutor>> {
        let path = Self::database_path(environment.connection_string.expose()).ok_or(
            SqlError::DbUnavailable {
                operation: "executor.create",
                detail: "connection string does not name a database file".to_string(),
            },
        )?;
        let executor =
            SqliteExecutor::connect(std::path::Path::new(&path), self.command_timeout).await?;
        Ok(Arc::new(executor))
    }
}

/// Everything the handlers need, wired once at startup.
pub struct ApiState {
    /// Endpoint registry snapshots.
    pub endpoints: Arc<EndpointRegistry>,
    /// Environment registry.
    pub environments: Arc<EnvironmentRegistry>,
    /// Token store over `auth.db`.
    pub tokens: TokenStore,
    /// Non-blocking audit writer.
    pub audit: AuditWriter,
    /// Response cache used by the proxy engine and health reporting.
    pub cache: Arc<dyn CacheProvider>,
    /// Failover view of the cache, when composed, for health reporting.
    pub cache_failover: Option<Arc<FailoverCacheProvider>>,
    /// SQL translation engine.
    pub sql: Arc<SqlEngine>,
    /// Upstream proxy engine.
    pub proxy: Arc<ProxyEngine>,
    /// File engine.
    pub files: Arc<FileService>,
    /// Executor factory for SQL backends.
    pub executor_factory: Arc<dyn SqlExecutorFactory>,
    /// Gateway tuning.
    pub settings: GatewaySettings,
    /// Per-IP admission buckets.
    pub ip_limiter: RateLimiter,
    /// Per-token admission buckets.
    pub token_limiter: RateLimiter,
    executors: Mutex<HashMap<String, Arc<dyn SqlExecutor>>>,
}

impl ApiState {
    /// Wire the state from its constructed parts.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        endpoints: Arc<EndpointRegistry>,
        environments: Arc<EnvironmentRegistry>,
        tokens: TokenStore,
        audit: AuditWriter,
        cache: Arc<dyn CacheProvider>,
        cache_failover: Option<Arc<FailoverCacheProvider>>,
        sql: Arc<SqlEngine>,
        proxy: Arc<ProxyEngine>,
        files: Arc<FileService>,
        executor_factory: Arc<dyn SqlExecutorFactory>,
        settings: GatewaySettings,
    ) -> Self {
        let replenish = Duration::from_secs(settings.rate_limit.replenish_seconds);
        let ip_limiter = RateLimiter::new(BucketConfig {
            burst: settings.rate_limit.ip_burst,
            replenish_period: replenish,
        });
        let token_limiter = RateLimiter::new(BucketConfig {
            burst: settings.rate_limit.token_burst,
            replenish_period: replenish,
        });
        Self {
            endpoints,
            environments,
            tokens,
            audit,
            cache,
            cache_failover,
            sql,
            proxy,
            files,
            executor_factory,
            settings,
            ip_limiter,
            token_limiter,
            executors: Mutex::new(HashMap::new()),
        }
    }

    /// Executor for an environment, created on first use and cached.
    ///
    /// # Errors
    ///
    /// Propagates the factory's connection failure.
    pub async fn executor_for(
        &self,
        environment: &Environment,
    ) -> SqlResult<Arc<dyn SqlExecutor>> {
        let key = environment.name.to_ascii_lowercase();
        if let Some(existing) = self.lock_executors().get(&key) {
            return Ok(existing.clone());
        }
        let executor = self.executor_factory.create(environment).await?;
        self.lock_executors().insert(key, executor.clone());
        Ok(executor)
    }

    /// Drop a cached executor so the next request reconnects.
    pub fn invalidate_executor(&self, environment: &str) {
        self.lock_executors()
            .remove(&environment.to_ascii_lowercase());
    }

    fn lock_executors(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn SqlExecutor>>> {
        self.executors.lock().unwrap_or_else(|err| {
            panic!("failed to lock executor cache: {err}");
        })
    }
}

/// Short stable hash of the authorization context, used in cache keys so
/// principals never share cached responses.
#[must_use]
pub fn auth_context_hash(token_id: i64, username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token_id.to_le_bytes());
    hasher.update(username.as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_path_accepts_the_supported_shapes() {
        assert_eq!(
            SqliteExecutorFactory::database_path("sqlite://data/prod.db"),
            Some("data/prod.db".to_string())
        );
        assert_eq!(
            SqliteExecutorFactory::database_path("Data Source=/srv/prod.db;Cache=Shared"),
            Some("/srv/prod.db".to_string())
        );
        assert_eq!(
            SqliteExecutorFactory::database_path("/srv/prod.db"),
            Some("/srv/prod.db".to_string())
        );
        assert_eq!(
            SqliteExecutorFactory::database_path("Server=sql01;Database=x"),
            None
        );
    }

    #[test]
    fn auth_hash_is_stable_and_principal_specific() {
        let first = auth_context_hash(7, "alice");
        assert_eq!(first, auth_context_hash(7, "alice"));
        assert_ne!(first, auth_context_hash(8, "alice"));
        assert_ne!(first, auth_context_hash(7, "bob"));
        assert_eq!(first.len(), 16);
    }
}
