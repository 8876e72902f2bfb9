//! Service graph construction and background task wiring.
//!
//! The graph builds leaves-first: cache provider, environment registry,
//! endpoint registry, token store, engines, then the router. Registries
//! publish immutable snapshots, so running requests keep the view they
//! captured at dispatch while reloads swap in new ones.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use portway_api::{ApiServer, ApiState, SqliteExecutorFactory};
use portway_auth::{AuditWriter, TokenStore};
use portway_cache::{
    CacheProvider, FailoverCacheProvider, MemoryCacheProvider, RedisCacheProvider,
};
use portway_config::{
    DataPaths, EndpointRegistry, EnvironmentRegistry, GatewaySettings, WatcherOptions, crypto,
    settings::resolve_bind_addr, watcher,
};
use portway_events::{Event, EventBus};
use portway_files::{FileService, FileServiceOptions};
use portway_proxy::ProxyEngine;
use portway_sql::{MetadataCache, SqlEngine};
use tracing::{info, warn};

use crate::telemetry::{self, LogFormat};

/// Environment variable overriding the data directory (defaults to the
/// working directory).
pub const DATA_DIR_VAR: &str = "PORTWAY_DATA_DIR";

/// Build the service graph and serve until shutdown.
///
/// # Errors
///
/// Returns an error when mandatory configuration is missing or the listener
/// cannot bind.
pub async fn run_app() -> Result<()> {
    let base = std::env::var(DATA_DIR_VAR).map_or_else(|_err| PathBuf::from("."), PathBuf::from);
    let paths = DataPaths::under(&base);

    std::fs::create_dir_all(&paths.log).context("failed to create log directory")?;
    let _log_guard = telemetry::init_logging(&paths.log, LogFormat::infer())?;

    let settings = GatewaySettings::load(&base).context("failed to load gateway settings")?;
    let bind_addr = resolve_bind_addr().context("failed to resolve bind address")?;

    let bus = EventBus::new();
    let allow_list = EnvironmentRegistry::load_allow_list(&paths.environments)
        .context("failed to load the environment allow-list")?;
    info!(environments = ?allow_list, "environment allow-list loaded");

    let private_key = crypto::load_private_key().context("failed to load the encryption key")?;
    if private_key.is_some() {
        info!("settings decryption key available");
    }
    let environments = Arc::new(EnvironmentRegistry::new(
        &paths.environments,
        allow_list.clone(),
        private_key,
        None,
        bus.clone(),
    ));
    let endpoints = Arc::new(
        EndpointRegistry::load(&paths.endpoints, allow_list.clone(), bus.clone())
            .context("failed to load the endpoint registry")?,
    );
    info!(count = endpoints.snapshot().len(), "endpoint definitions loaded");

    let tokens = TokenStore::connect(&paths.auth_db)
        .await
        .context("failed to open the token database")?;
    let audit = AuditWriter::spawn(tokens.pool().clone());

    let (cache, cache_failover) = build_cache(&settings).await;

    let metadata = Arc::new(MetadataCache::new());
    metadata.spawn_invalidator(&bus);
    let sql = Arc::new(SqlEngine::new(metadata, settings.sql.default_top));

    let proxy = Arc::new(
        ProxyEngine::new(
            cache.clone(),
            Duration::from_secs(settings.proxy.upstream_timeout_seconds),
            settings.proxy.default_cache_seconds,
            settings.proxy.overwrite_appended_headers,
        )
        .context("failed to build the proxy engine")?,
    );

    let files = Arc::new(FileService::new(FileServiceOptions {
        root: paths.files.clone(),
        max_file_size_bytes: settings.file_storage.max_file_size_bytes,
        memory_cache_enabled: settings.file_storage.memory_cache_enabled,
        max_total_memory_bytes: settings.file_storage.max_total_memory_cache_mb * 1024 * 1024,
        blocked_extensions: settings.file_storage.blocked_extensions.clone(),
    }));
    for environment in &allow_list {
        files.rebuild_index(environment);
    }

    let executor_factory = Arc::new(SqliteExecutorFactory::new(Duration::from_secs(
        settings.sql.command_timeout_seconds,
    )));

    let state = Arc::new(ApiState::new(
        endpoints.clone(),
        environments.clone(),
        tokens,
        audit,
        cache,
        cache_failover,
        sql,
        proxy,
        files.clone(),
        executor_factory,
        settings.clone(),
    ));

    spawn_endpoint_watcher(&paths.endpoints, endpoints.clone());
    spawn_environment_watcher(&paths.environments, environments.clone());
    spawn_executor_invalidator(&bus, state.clone());
    spawn_file_timers(&settings, files, allow_list);

    info!(%bind_addr, "gateway configured; starting server");
    ApiServer::new(state).serve(bind_addr).await
}

async fn build_cache(
    settings: &GatewaySettings,
) -> (Arc<dyn CacheProvider>, Option<Arc<FailoverCacheProvider>>) {
    let memory = Arc::new(MemoryCacheProvider::new(settings.cache.memory_max_entries));
    let Some(redis_url) = settings.cache.redis_url.as_deref() else {
        info!("response cache: memory provider");
        return (memory, None);
    };

    let op_timeout = Duration::from_secs(settings.cache.operation_timeout_seconds);
    match RedisCacheProvider::connect(redis_url, op_timeout).await {
        Ok(redis) => {
            info!("response cache: redis with memory failover");
            let failover = Arc::new(FailoverCacheProvider::new(Arc::new(redis), memory));
            (failover.clone(), Some(failover))
        }
        Err(err) => {
            warn!(error = %err, "redis unavailable at startup; using memory cache");
            (memory, None)
        }
    }
}

fn spawn_endpoint_watcher(root: &Path, endpoints: Arc<EndpointRegistry>) {
    let options = WatcherOptions::default();
    match watcher::spawn(root, &options) {
        Ok(mut stream) => {
            tokio::spawn(async move {
                while let Some(path) = stream.next().await {
                    if let Some(kind) = endpoints.kind_for_path(&path) {
                        info!(path = %path.display(), kind = kind.as_str(), "endpoint change detected");
                        endpoints.reload_kind(kind);
                    }
                }
            });
        }
        Err(err) => {
            warn!(error = %err, "endpoint watcher unavailable; definitions are fixed until restart");
        }
    }
}

fn spawn_environment_watcher(root: &Path, environments: Arc<EnvironmentRegistry>) {
    let options = WatcherOptions::default();
    match watcher::spawn(root, &options) {
        Ok(mut stream) => {
            tokio::spawn(async move {
                while let Some(path) = stream.next().await {
                    if let Some(name) = environments.environment_for_path(&path) {
                        info!(environment = %name, "environment settings change detected");
                        environments.invalidate(&name);
                    }
                }
            });
        }
        Err(err) => {
            warn!(error = %err, "environment watcher unavailable; settings are fixed until restart");
        }
    }
}

/// Environment reloads drop the cached executor so the next request
/// reconnects with fresh credentials.
fn spawn_executor_invalidator(bus: &EventBus, state: Arc<ApiState>) {
    let mut feed = bus.subscribe();
    tokio::spawn(async move {
        while let Some(envelope) = feed.next().await {
            if let Event::EnvironmentChanged { name, .. } = envelope.event {
                state.invalidate_executor(&name);
            }
        }
    });
}

fn spawn_file_timers(
    settings: &GatewaySettings,
    files: Arc<FileService>,
    environments: Vec<String>,
) {
    let flush_period = Duration::from_secs(settings.file_storage.flush_interval_seconds.max(1));
    let refresh_period = Duration::from_secs(settings.file_storage.index_refresh_seconds.max(1));

    let flush_files = files.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            flush_files.flush_dirty().await;
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresh_period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for environment in &environments {
                files.rebuild_index(environment);
            }
        }
    });
}
