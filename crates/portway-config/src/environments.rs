//! Environment registry: allow-list, settings resolution, copy-on-reload.
//!
//! Settings resolve in order: a remote secret source when configured, then
//! the local `environments/{env}/settings.json` file, which may arrive
//! encrypted. Resolved environments are cached and rebuilt on invalidation;
//! readers always see a consistent `Arc<Environment>`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use portway_events::{ChangeKind, Event, EventBus};
use rsa::RsaPrivateKey;
use tracing::{debug, warn};

use crate::crypto::{self, SecretString};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{Environment, EnvironmentSettings, GlobalSettings};

const SETTINGS_FILE: &str = "settings.json";

/// Header always present on resolved environments, carrying the environment
/// name for backend correlation.
pub const HEADER_DATABASE_NAME: &str = "DatabaseName";

/// Header always present on resolved environments, carrying the server name.
pub const HEADER_SERVER_NAME: &str = "ServerName";

/// Remote secret backend consulted before local files.
///
/// Key names follow the `{env}-ConnectionString` / `{env}-ServerName` /
/// `{env}-Headers` convention. Key management itself is outside the gateway;
/// implementations plug in here.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch a secret by name, `None` when the key does not exist.
    async fn fetch(&self, key: &str) -> ConfigResult<Option<String>>;
}

/// Serves `(connectionString, serverName, headers)` for named environments.
pub struct EnvironmentRegistry {
    root: PathBuf,
    allow_list: Vec<String>,
    private_key: Option<RsaPrivateKey>,
    remote: Option<Arc<dyn SecretSource>>,
    bus: EventBus,
    cache: RwLock<HashMap<String, Arc<Environment>>>,
}

impl EnvironmentRegistry {
    /// Create a registry rooted at the `environments/` directory.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        allow_list: Vec<String>,
        private_key: Option<RsaPrivateKey>,
        remote: Option<Arc<dyn SecretSource>>,
        bus: EventBus,
    ) -> Self {
        Self {
            root: root.into(),
            allow_list,
            private_key,
            remote,
            bus,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Read the global allow-list from `environments/settings.json`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or malformed; the gateway
    /// cannot start without an allow-list.
    pub fn load_allow_list(root: &Path) -> ConfigResult<Vec<String>> {
        let path = root.join(SETTINGS_FILE);
        let body = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            operation: "environments.read_allow_list",
            source,
        })?;
        let global: GlobalSettings =
            serde_json::from_str(&body).map_err(|source| ConfigError::MalformedJson {
                path: path.display().to_string(),
                source,
            })?;
        Ok(global.allowed_environments)
    }

    /// Whether the named environment is in the global allow-list.
    #[must_use]
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allow_list
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(name))
    }

    /// Names in the global allow-list.
    #[must_use]
    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }

    /// Resolve an environment, loading lazily on first reference.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvironmentNotAllowed`] for names outside the
    /// allow-list, [`ConfigError::EnvironmentMisconfigured`] when mandatory
    /// settings are missing, and decryption errors for encrypted settings
    /// without a usable key.
    pub async fn get(&self, name: &str) -> ConfigResult<Arc<Environment>> {
        let canonical = self
            .allow_list
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| ConfigError::EnvironmentNotAllowed {
                name: name.to_string(),
            })?;

        let key = canonical.to_ascii_lowercase();
        if let Some(environment) = self.read_guard().get(&key) {
            return Ok(environment.clone());
        }

        let environment = Arc::new(self.resolve(&canonical).await?);
        self.write_guard().insert(key, environment.clone());
        Ok(environment)
    }

    /// Drop a cached environment so the next reference reloads it.
    pub fn invalidate(&self, name: &str) {
        let removed = self
            .write_guard()
            .remove(&name.to_ascii_lowercase())
            .is_some();
        if removed {
            self.bus.publish(Event::EnvironmentChanged {
                name: name.to_string(),
                change: ChangeKind::Updated,
            });
            debug!(environment = name, "environment cache invalidated");
        }
    }

    /// The environment owning a changed settings path, if any.
    #[must_use]
    pub fn environment_for_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut components = relative.components();
        let env = components.next()?.as_os_str().to_str()?.to_string();
        let file = components.next()?.as_os_str().to_str()?;
        (file == SETTINGS_FILE).then_some(env)
    }

    async fn resolve(&self, name: &str) -> ConfigResult<Environment> {
        if let Some(remote) = &self.remote {
            match self.resolve_remote(remote.as_ref(), name).await {
                Ok(Some(environment)) => return Ok(environment),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        environment = name,
                        error = %err,
                        "remote secret lookup failed; falling back to local settings"
                    );
                }
            }
        }
        self.resolve_local(name).await
    }

    async fn resolve_remote(
        &self,
        remote: &dyn SecretSource,
        name: &str,
    ) -> ConfigResult<Option<Environment>> {
        let Some(connection_string) = remote.fetch(&format!("{name}-ConnectionString")).await?
        else {
            return Ok(None);
        };
        let server_name = remote
            .fetch(&format!("{name}-ServerName"))
            .await?
            .unwrap_or_else(|| name.to_string());
        let headers = match remote.fetch(&format!("{name}-Headers")).await? {
            Some(body) => serde_json::from_str::<BTreeMap<String, String>>(&body).map_err(
                |source| ConfigError::MalformedJson {
                    path: format!("{name}-Headers"),
                    source,
                },
            )?,
            None => BTreeMap::new(),
        };

        Ok(Some(build_environment(
            name,
            server_name,
            SecretString::new(connection_string),
            headers,
        )))
    }

    async fn resolve_local(&self, name: &str) -> ConfigResult<Environment> {
        let path = self.root.join(name).join(SETTINGS_FILE);
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io {
                operation: "environments.read_settings",
                source,
            })?;

        let body = if crypto::is_encrypted(&body) {
            let Some(key) = &self.private_key else {
                return Err(ConfigError::SettingsDecryptionUnavailable);
            };
            crypto::decrypt_settings(&body, key)?
        } else {
            body
        };

        let settings =
            EnvironmentSettings::parse(&body).map_err(|source| ConfigError::MalformedJson {
                path: path.display().to_string(),
                source,
            })?;

        let connection_string =
            settings
                .connection_string
                .ok_or(ConfigError::EnvironmentMisconfigured {
                    name: name.to_string(),
                    field: "ConnectionString",
                })?;
        let server_name = settings
            .server_name
            .unwrap_or_else(|| name.to_string());

        Ok(build_environment(
            name,
            server_name,
            connection_string,
            settings.headers,
        ))
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Environment>>> {
        self.cache.read().unwrap_or_else(|err| {
            panic!("failed to lock environment cache for read: {err}");
        })
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Environment>>> {
        self.cache.write().unwrap_or_else(|err| {
            panic!("failed to lock environment cache for write: {err}");
        })
    }
}

fn build_environment(
    name: &str,
    server_name: String,
    connection_string: SecretString,
    mut headers: BTreeMap<String, String>,
) -> Environment {
    headers
        .entry(HEADER_DATABASE_NAME.to_string())
        .or_insert_with(|| name.to_string());
    headers
        .entry(HEADER_SERVER_NAME.to_string())
        .or_insert_with(|| server_name.clone());
    Environment {
        name: name.to_string(),
        server_name,
        connection_string,
        headers,
    }
}
