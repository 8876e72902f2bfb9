//! Gateway server settings: directories, bind address, engine tuning.
//!
//! Loaded from an optional `settings.json` beside the data directories, with
//! environment-variable overrides for deployment concerns (`ASPNETCORE_URLS`
//! for the bind address).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable carrying one or more bind URLs, first one wins.
pub const BIND_URLS_VAR: &str = "ASPNETCORE_URLS";

const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RateLimitSettings {
    /// Token bucket burst per client IP.
    pub ip_burst: u32,
    /// Token bucket burst per token id.
    pub token_burst: u32,
    /// Seconds to fully replenish a bucket.
    pub replenish_seconds: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            ip_burst: 100,
            token_burst: 60,
            replenish_seconds: 60,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CacheSettings {
    /// Redis connection URL; memory-only when absent.
    pub redis_url: Option<String>,
    /// Default TTL for cached proxy responses, seconds.
    pub default_ttl_seconds: u64,
    /// Bound on in-memory cache entries.
    pub memory_max_entries: usize,
    /// Timeout for a single cache backend operation, seconds.
    pub operation_timeout_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            default_ttl_seconds: 300,
            memory_max_entries: 10_000,
            operation_timeout_seconds: 5,
        }
    }
}

/// File engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileStorageSettings {
    /// Upload size ceiling in bytes.
    pub max_file_size_bytes: u64,
    /// Total in-memory cache budget in megabytes.
    pub max_total_memory_cache_mb: u64,
    /// Whether the hybrid memory layer is enabled.
    pub memory_cache_enabled: bool,
    /// Seconds between dirty-file flush ticks.
    pub flush_interval_seconds: u64,
    /// Seconds between index reconciliation walks.
    pub index_refresh_seconds: u64,
    /// Extensions rejected on upload (lowercase, with dot).
    pub blocked_extensions: Vec<String>,
}

impl Default for FileStorageSettings {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024,
            max_total_memory_cache_mb: 200,
            memory_cache_enabled: true,
            flush_interval_seconds: 60,
            index_refresh_seconds: 20 * 60,
            blocked_extensions: [
                ".exe", ".dll", ".bat", ".cmd", ".sh", ".msi", ".ps1", ".com", ".scr",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// SQL engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SqlSettings {
    /// Cap applied when `$top` is absent.
    pub default_top: u64,
    /// Command timeout, seconds.
    pub command_timeout_seconds: u64,
}

impl Default for SqlSettings {
    fn default() -> Self {
        Self {
            default_top: 1_000,
            command_timeout_seconds: 30,
        }
    }
}

/// Proxy engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProxySettings {
    /// Upstream request timeout, seconds.
    pub upstream_timeout_seconds: u64,
    /// Default cache duration when the upstream sets none, seconds.
    pub default_cache_seconds: u64,
    /// Whether appended headers overwrite existing request headers.
    pub overwrite_appended_headers: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            upstream_timeout_seconds: 30,
            default_cache_seconds: 300,
            overwrite_appended_headers: false,
        }
    }
}

/// Top-level gateway settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct GatewaySettings {
    /// Rate limiting section.
    pub rate_limit: RateLimitSettings,
    /// Response cache section.
    pub cache: CacheSettings,
    /// File engine section.
    pub file_storage: FileStorageSettings,
    /// SQL engine section.
    pub sql: SqlSettings,
    /// Proxy engine section.
    pub proxy: ProxySettings,
}

impl GatewaySettings {
    /// Load settings from `{base}/settings.json`, defaulting every section
    /// when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but is malformed.
    pub fn load(base: &Path) -> ConfigResult<Self> {
        let path = base.join("settings.json");
        if !path.is_file() {
            return Ok(Self::default());
        }
        let body = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            operation: "settings.read",
            source,
        })?;
        serde_json::from_str(&body).map_err(|source| ConfigError::MalformedJson {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Data directory layout rooted at the working directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Endpoint definition tree.
    pub endpoints: PathBuf,
    /// Environment settings tree.
    pub environments: PathBuf,
    /// File engine storage root.
    pub files: PathBuf,
    /// Daily log directory.
    pub log: PathBuf,
    /// Embedded token/audit database.
    pub auth_db: PathBuf,
}

impl DataPaths {
    /// Standard layout under a base directory.
    #[must_use]
    pub fn under(base: &Path) -> Self {
        Self {
            endpoints: base.join("endpoints"),
            environments: base.join("environments"),
            files: base.join("files"),
            log: base.join("log"),
            auth_db: base.join("auth.db"),
        }
    }
}

/// Resolve the bind address from `ASPNETCORE_URLS`, defaulting to port 8080.
///
/// # Errors
///
/// Returns an error when the variable is set but unparsable.
pub fn resolve_bind_addr() -> ConfigResult<SocketAddr> {
    let raw = std::env::var(BIND_URLS_VAR).unwrap_or_default();
    let first = raw.split(';').next().unwrap_or("").trim();
    let candidate = if first.is_empty() {
        DEFAULT_BIND.to_string()
    } else {
        let stripped = first
            .strip_prefix("http://")
            .or_else(|| first.strip_prefix("https://"))
            .unwrap_or(first);
        let stripped = stripped.trim_end_matches('/');
        // ASP.NET-style wildcard hosts bind everywhere.
        let stripped = stripped.replace('+', "0.0.0.0").replace('*', "0.0.0.0");
        if stripped.contains(':') {
            stripped
        } else {
            format!("{stripped}:8080")
        }
    };
    candidate
        .parse()
        .map_err(|_err| ConfigError::EnvironmentMisconfigured {
            name: BIND_URLS_VAR.to_string(),
            field: "bind address",
        })
}
