//! Endpoint registry: discovery, validation, immutable snapshots, reload.
//!
//! Definitions live in a directory tree
//! `endpoints/{SQL|Proxy|Webhooks|Files|Static}/[{namespace}/]{name}/entity.json`;
//! the kind is inferred from the top-level directory. Failed definitions are
//! logged and omitted — a bad file never takes the gateway down. Consumers
//! hold read-only snapshots that stay stable for the lifetime of a request.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use portway_events::{ChangeKind, EndpointKind, Event, EventBus};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    ColumnMapping, CompositeEndpoint, EndpointDefinition, EndpointPayload, FileEndpoint,
    ParameterSource, ProxyEndpoint, RawEntity, SqlEndpoint, SqlObjectType, StaticEndpoint,
    WebhookEndpoint, validate_methods,
};

const ENTITY_FILE: &str = "entity.json";

const KIND_DIRS: &[(&str, EndpointKind)] = &[
    ("SQL", EndpointKind::Sql),
    ("Proxy", EndpointKind::Proxy),
    ("Webhooks", EndpointKind::Webhook),
    ("Files", EndpointKind::File),
    ("Static", EndpointKind::Static),
];

/// Immutable view of all parsed endpoint definitions.
#[derive(Debug, Default)]
pub struct EndpointSnapshot {
    by_kind: HashMap<EndpointKind, HashMap<String, Arc<EndpointDefinition>>>,
}

impl EndpointSnapshot {
    /// Endpoint with the given name within a kind, if present.
    #[must_use]
    pub fn get(&self, kind: EndpointKind, name: &str) -> Option<&Arc<EndpointDefinition>> {
        self.by_kind
            .get(&kind)
            .and_then(|members| members.get(&name.to_ascii_lowercase()))
    }

    /// All endpoints of a kind, unsorted.
    #[must_use]
    pub fn of_kind(&self, kind: EndpointKind) -> impl Iterator<Item = &Arc<EndpointDefinition>> {
        self.by_kind.get(&kind).into_iter().flat_map(HashMap::values)
    }

    /// Total number of parsed definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.values().map(HashMap::len).sum()
    }

    /// Whether the snapshot holds no definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of resolving a request path against the registry.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A definition matched; `remainder` holds the unconsumed path segments.
    Matched {
        /// The matched definition.
        definition: Arc<EndpointDefinition>,
        /// Path segments after the endpoint name.
        remainder: Vec<String>,
    },
    /// No endpoint of the candidate kinds matched the path.
    NotFound,
    /// An endpoint matched but does not allow the request method.
    MethodNotAllowed(Arc<EndpointDefinition>),
    /// An endpoint matched but is not exposed in the environment.
    EnvironmentNotAllowed(Arc<EndpointDefinition>),
}

/// Discovers, validates, and serves endpoint definitions.
pub struct EndpointRegistry {
    root: PathBuf,
    allow_list: Vec<String>,
    bus: EventBus,
    snapshot: RwLock<Arc<EndpointSnapshot>>,
}

impl EndpointRegistry {
    /// Create a registry rooted at the `endpoints/` directory and perform the
    /// initial scan.
    ///
    /// # Errors
    ///
    /// Returns an error only when the root directory itself is unreadable;
    /// individual definition failures are logged and skipped.
    pub fn load(
        root: impl Into<PathBuf>,
        allow_list: Vec<String>,
        bus: EventBus,
    ) -> ConfigResult<Self> {
        let registry = Self {
            root: root.into(),
            allow_list,
            bus,
            snapshot: RwLock::new(Arc::new(EndpointSnapshot::default())),
        };
        let initial = registry.scan_all()?;
        *registry.write_guard() = Arc::new(initial);
        Ok(registry)
    }

    /// Current immutable snapshot; cheap to clone, stable per request.
    #[must_use]
    pub fn snapshot(&self) -> Arc<EndpointSnapshot> {
        self.read_guard().clone()
    }

    /// The endpoint kind owning a changed path, if it is under the root.
    #[must_use]
    pub fn kind_for_path(&self, path: &Path) -> Option<EndpointKind> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let first = relative.components().next()?;
        let first = first.as_os_str().to_str()?;
        KIND_DIRS
            .iter()
            .find(|(dir, _)| *dir == first)
            .map(|(_, kind)| *kind)
    }

    /// Re-scan one kind directory and publish change events for the diff.
    pub fn reload_kind(&self, kind: EndpointKind) {
        let members = self.scan_kind(kind);
        let previous = self.snapshot();

        let mut next = HashMap::new();
        for (existing_kind, existing) in &previous.by_kind {
            if *existing_kind != kind {
                next.insert(*existing_kind, existing.clone());
            }
        }

        let old_names: Vec<String> = previous
            .by_kind
            .get(&kind)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default();

        for name in &old_names {
            let change = if members.contains_key(name) {
                ChangeKind::Updated
            } else {
                ChangeKind::Removed
            };
            self.bus.publish(Event::EndpointChanged {
                kind,
                name: name.clone(),
                change,
            });
        }
        for name in members.keys() {
            if !old_names.contains(name) {
                self.bus.publish(Event::EndpointChanged {
                    kind,
                    name: name.clone(),
                    change: ChangeKind::Created,
                });
            }
        }

        next.insert(kind, members);
        *self.write_guard() = Arc::new(EndpointSnapshot { by_kind: next });
        debug!(kind = kind.as_str(), "endpoint kind reloaded");
    }

    /// Resolve a request path against candidate kinds.
    ///
    /// Segments are matched longest-prefix-first so namespaced endpoints win
    /// over shorter names; anything after the match is returned as the
    /// remainder (key segments, proxied path suffix).
    #[must_use]
    pub fn resolve(
        &self,
        kinds: &[EndpointKind],
        environment: &str,
        segments: &[String],
        method: &str,
    ) -> Resolution {
        let snapshot = self.snapshot();
        for take in (1..=segments.len().min(2)).rev() {
            let candidate = segments[..take].join("/").to_ascii_lowercase();
            for kind in kinds {
                if let Some(definition) = snapshot.get(*kind, &candidate) {
                    if !definition.allows_environment(environment) {
                        return Resolution::EnvironmentNotAllowed(definition.clone());
                    }
                    if !definition.allows_method(method) {
                        return Resolution::MethodNotAllowed(definition.clone());
                    }
                    return Resolution::Matched {
                        definition: definition.clone(),
                        remainder: segments[take..].to_vec(),
                    };
                }
            }
        }
        Resolution::NotFound
    }

    /// Public, environment-visible endpoints sorted by name.
    #[must_use]
    pub fn list(&self, environment: &str) -> Vec<Arc<EndpointDefinition>> {
        let snapshot = self.snapshot();
        let mut visible: Vec<Arc<EndpointDefinition>> = KIND_DIRS
            .iter()
            .flat_map(|(_, kind)| snapshot.of_kind(*kind))
            .filter(|definition| !definition.is_private)
            .filter(|definition| definition.allows_environment(environment))
            .cloned()
            .collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name));
        visible
    }

    fn scan_all(&self) -> ConfigResult<EndpointSnapshot> {
        if !self.root.exists() {
            return Err(ConfigError::Io {
                operation: "endpoints.scan_root",
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    self.root.display().to_string(),
                ),
            });
        }
        let mut by_kind = HashMap::new();
        for (_, kind) in KIND_DIRS {
            by_kind.insert(*kind, self.scan_kind(*kind));
        }
        Ok(EndpointSnapshot { by_kind })
    }

    fn scan_kind(&self, kind: EndpointKind) -> HashMap<String, Arc<EndpointDefinition>> {
        let dir_name = KIND_DIRS
            .iter()
            .find(|(_, candidate)| *candidate == kind)
            .map(|(dir, _)| *dir)
            .unwrap_or_default();
        let kind_dir = self.root.join(dir_name);
        let mut members = HashMap::new();
        if !kind_dir.is_dir() {
            return members;
        }

        for (namespace, name, entity_path) in discover_entities(&kind_dir) {
            match self.parse_entity(kind, namespace.as_deref(), &name, &entity_path) {
                Ok(definition) => {
                    let key = definition.name.to_ascii_lowercase();
                    if members.contains_key(&key) {
                        warn!(
                            endpoint = %definition.name,
                            path = %entity_path.display(),
                            "duplicate endpoint name within kind; keeping the first definition"
                        );
                        continue;
                    }
                    members.insert(key, Arc::new(definition));
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %entity_path.display(),
                        "skipping invalid endpoint definition"
                    );
                }
            }
        }
        members
    }

    fn parse_entity(
        &self,
        kind: EndpointKind,
        namespace: Option<&str>,
        name: &str,
        path: &Path,
    ) -> ConfigResult<EndpointDefinition> {
        let body = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            operation: "endpoints.read_entity",
            source,
        })?;
        let raw: RawEntity =
            serde_json::from_str(&body).map_err(|source| ConfigError::MalformedJson {
                path: path.display().to_string(),
                source,
            })?;
        build_definition(
            kind,
            namespace,
            name,
            path,
            raw,
            &self.allow_list,
        )
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, Arc<EndpointSnapshot>> {
        self.snapshot.read().unwrap_or_else(|err| {
            panic!("failed to lock endpoint snapshot for read: {err}");
        })
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, Arc<EndpointSnapshot>> {
        self.snapshot.write().unwrap_or_else(|err| {
            panic!("failed to lock endpoint snapshot for write: {err}");
        })
    }
}

/// Walk a kind directory yielding `(namespace, name, entity_path)` triples.
fn discover_entities(kind_dir: &Path) -> Vec<(Option<String>, String, PathBuf)> {
    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir(kind_dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(dir_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let entity = path.join(ENTITY_FILE);
        if entity.is_file() {
            found.push((None, dir_name.to_string(), entity));
            continue;
        }
        // One namespace level: {namespace}/{name}/entity.json.
        let Ok(nested) = fs::read_dir(&path) else {
            continue;
        };
        for nested_entry in nested.flatten() {
            let nested_path = nested_entry.path();
            if !nested_path.is_dir() {
                continue;
            }
            let Some(nested_name) = nested_path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let nested_entity = nested_path.join(ENTITY_FILE);
            if nested_entity.is_file() {
                found.push((
                    Some(dir_name.to_string()),
                    nested_name.to_string(),
                    nested_entity,
                ));
            }
        }
    }
    found
}

fn build_definition(
    kind: EndpointKind,
    namespace: Option<&str>,
    name: &str,
    path: &Path,
    raw: RawEntity,
    allow_list: &[String],
) -> ConfigResult<EndpointDefinition> {
    let display_path = path.display().to_string();
    let full_name = namespace.map_or_else(
        || name.to_string(),
        |namespace| format!("{namespace}/{name}"),
    );

    if let Some(environment) = raw.allowed_environments.iter().find(|environment| {
        !allow_list
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(environment))
    }) {
        return Err(ConfigError::ConfigInvalid {
            path: display_path,
            reason: format!("environment '{environment}' is not in the global allow-list"),
        });
    }

    let allowed_methods = if raw.allowed_methods.is_empty() {
        default_methods(kind)
    } else {
        validate_methods(&display_path, &raw.allowed_methods)?
    };

    // Proxy-directory entities may declare themselves composite.
    let effective_kind = if kind == EndpointKind::Proxy
        && raw
            .entity_type
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case("composite"))
    {
        EndpointKind::Composite
    } else {
        kind
    };

    let payload = build_payload(effective_kind, &display_path, &raw)?;

    Ok(EndpointDefinition {
        name: full_name,
        namespace: namespace.map(str::to_string),
        kind: effective_kind,
        allowed_environments: raw.allowed_environments,
        allowed_methods,
        is_private: raw.is_private,
        custom_properties: raw.custom_properties,
        source_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        payload,
    })
}

fn build_payload(
    kind: EndpointKind,
    path: &str,
    raw: &RawEntity,
) -> ConfigResult<EndpointPayload> {
    match kind {
        EndpointKind::Sql => {
            let object_name = require(path, "DatabaseObjectName", raw.database_object_name.as_deref())?;
            let columns = parse_columns(path, &raw.allowed_columns)?;
            let object_type = raw.object_type.unwrap_or(SqlObjectType::Table);
            let tvf_parameters = raw.function_parameters.clone();
            if object_type == SqlObjectType::TableValuedFunction {
                validate_tvf_positions(path, &tvf_parameters)?;
            }
            Ok(EndpointPayload::Sql(SqlEndpoint {
                schema: raw
                    .database_schema
                    .clone()
                    .unwrap_or_else(|| "dbo".to_string()),
                object_name,
                object_type,
                primary_key: raw.primary_key.clone(),
                columns,
                procedure: raw.procedure.clone(),
                tvf_parameters,
            }))
        }
        EndpointKind::Proxy => {
            let upstream_url = require(path, "Url", raw.url.as_deref())?;
            Ok(EndpointPayload::Proxy(ProxyEndpoint {
                upstream_url,
                rewrite_response_urls: raw.rewrite_response_urls.unwrap_or(false),
            }))
        }
        EndpointKind::Composite => {
            if raw.steps.is_empty() {
                return Err(ConfigError::ConfigInvalid {
                    path: path.to_string(),
                    reason: "composite endpoint declares no steps".to_string(),
                });
            }
            Ok(EndpointPayload::Composite(CompositeEndpoint {
                steps: raw.steps.clone(),
            }))
        }
        EndpointKind::File => Ok(EndpointPayload::File(FileEndpoint {
            base_directory: raw.base_directory.clone(),
            allowed_extensions: raw
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim().to_ascii_lowercase())
                .collect(),
        })),
        EndpointKind::Webhook => {
            let object_name = require(path, "DatabaseObjectName", raw.database_object_name.as_deref())?;
            Ok(EndpointPayload::Webhook(WebhookEndpoint {
                object_name,
                schema: raw
                    .database_schema
                    .clone()
                    .unwrap_or_else(|| "dbo".to_string()),
                columns: parse_columns(path, &raw.allowed_columns)?,
            }))
        }
        EndpointKind::Static => Ok(EndpointPayload::Static(StaticEndpoint {
            content_file: raw
                .content_file
                .clone()
                .unwrap_or_else(|| "content.json".to_string()),
            content_type: raw.content_type.clone(),
        })),
    }
}

fn parse_columns(path: &str, entries: &[String]) -> ConfigResult<ColumnMapping> {
    ColumnMapping::parse(entries).map_err(|reason| ConfigError::ConfigInvalid {
        path: path.to_string(),
        reason,
    })
}

fn require(path: &str, field: &'static str, value: Option<&str>) -> ConfigResult<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::ConfigInvalid {
            path: path.to_string(),
            reason: format!("missing mandatory field '{field}'"),
        })
}

fn validate_tvf_positions(
    path: &str,
    parameters: &[crate::model::TvfParameter],
) -> ConfigResult<()> {
    let mut positions: Vec<u8> = parameters
        .iter()
        .filter(|parameter| parameter.source == ParameterSource::Path)
        .map(|parameter| {
            parameter.position.ok_or_else(|| ConfigError::ConfigInvalid {
                path: path.to_string(),
                reason: format!(
                    "path-sourced parameter '{}' has no Position",
                    parameter.name
                ),
            })
        })
        .collect::<ConfigResult<_>>()?;
    positions.sort_unstable();
    for (index, position) in positions.iter().enumerate() {
        let expected = u8::try_from(index + 1).unwrap_or(u8::MAX);
        if *position != expected {
            return Err(ConfigError::ConfigInvalid {
                path: path.to_string(),
                reason: format!(
                    "path parameter positions must be contiguous from 1; found {position} where {expected} was expected"
                ),
            });
        }
    }
    Ok(())
}

fn default_methods(kind: EndpointKind) -> Vec<String> {
    match kind {
        EndpointKind::Sql | EndpointKind::Static => vec!["GET".to_string()],
        EndpointKind::Proxy => vec![
            "GET".to_string(),
            "POST".to_string(),
            "PUT".to_string(),
            "PATCH".to_string(),
            "DELETE".to_string(),
        ],
        EndpointKind::Composite | EndpointKind::Webhook => vec!["POST".to_string()],
        EndpointKind::File => vec!["GET".to_string(), "POST".to_string(), "DELETE".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_entity(root: &Path, kind: &str, name: &str, body: &str) {
        let dir = root.join(kind).join(name);
        fs::create_dir_all(&dir).expect("create endpoint dir");
        fs::write(dir.join(ENTITY_FILE), body).expect("write entity");
    }

    fn registry(root: &Path) -> EndpointRegistry {
        EndpointRegistry::load(
            root,
            vec!["prod".to_string(), "dev".to_string()],
            EventBus::with_queue_depth(16),
        )
        .expect("registry")
    }

    #[test]
    fn scans_sql_endpoints_with_aliases() {
        let dir = TempDir::new().expect("tempdir");
        write_entity(
            dir.path(),
            "SQL",
            "Products",
            r#"{
                "DatabaseObjectName": "Items",
                "DatabaseSchema": "dbo",
                "PrimaryKey": "ItemCode",
                "AllowedColumns": ["ItemCode;ProductNumber", "LongDescription;Description"],
                "AllowedEnvironments": ["prod"],
                "AllowedMethods": ["GET"]
            }"#,
        );

        let registry = registry(dir.path());
        let snapshot = registry.snapshot();
        let definition = snapshot
            .get(EndpointKind::Sql, "products")
            .expect("definition");
        let sql = definition.as_sql().expect("sql payload");
        assert_eq!(sql.object_name, "Items");
        assert_eq!(sql.columns.db_for_alias("ProductNumber"), Some("ItemCode"));
    }

    #[test]
    fn invalid_definitions_are_omitted_not_fatal() {
        let dir = TempDir::new().expect("tempdir");
        write_entity(
            dir.path(),
            "SQL",
            "Broken",
            r#"{"AllowedMethods": ["BREW"], "DatabaseObjectName": "X"}"#,
        );
        write_entity(
            dir.path(),
            "SQL",
            "Good",
            r#"{"DatabaseObjectName": "Items"}"#,
        );

        let registry = registry(dir.path());
        let snapshot = registry.snapshot();
        assert!(snapshot.get(EndpointKind::Sql, "broken").is_none());
        assert!(snapshot.get(EndpointKind::Sql, "good").is_some());
    }

    #[test]
    fn environment_outside_allow_list_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        write_entity(
            dir.path(),
            "SQL",
            "Internal",
            r#"{"DatabaseObjectName": "X", "AllowedEnvironments": ["shadow"]}"#,
        );
        let registry = registry(dir.path());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn proxy_directory_composite_entities_change_kind() {
        let dir = TempDir::new().expect("tempdir");
        write_entity(
            dir.path(),
            "Proxy",
            "SalesOrder",
            r#"{
                "Type": "Composite",
                "Steps": [
                    {"Name": "CreateOrderLines", "Endpoint": "OrderLines", "Method": "POST", "IsArray": true, "ArrayProperty": "Lines"}
                ]
            }"#,
        );
        let registry = registry(dir.path());
        let snapshot = registry.snapshot();
        assert!(snapshot.get(EndpointKind::Composite, "salesorder").is_some());
        assert!(snapshot.get(EndpointKind::Proxy, "salesorder").is_none());
    }

    #[test]
    fn resolve_prefers_namespaced_match_and_returns_remainder() {
        let dir = TempDir::new().expect("tempdir");
        let nested = dir.path().join("Proxy").join("crm").join("Accounts");
        fs::create_dir_all(&nested).expect("nested dir");
        fs::write(
            nested.join(ENTITY_FILE),
            r#"{"Url": "http://internal/srv/Account"}"#,
        )
        .expect("write entity");

        let registry = registry(dir.path());
        let segments = vec![
            "crm".to_string(),
            "accounts".to_string(),
            "detail".to_string(),
        ];
        match registry.resolve(&[EndpointKind::Proxy], "prod", &segments, "GET") {
            Resolution::Matched {
                definition,
                remainder,
            } => {
                assert_eq!(definition.name, "crm/Accounts");
                assert_eq!(remainder, vec!["detail".to_string()]);
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn resolve_reports_method_and_environment_denials() {
        let dir = TempDir::new().expect("tempdir");
        write_entity(
            dir.path(),
            "SQL",
            "Products",
            r#"{"DatabaseObjectName": "Items", "AllowedEnvironments": ["dev"], "AllowedMethods": ["GET"]}"#,
        );
        let registry = registry(dir.path());
        let segments = vec!["products".to_string()];

        assert!(matches!(
            registry.resolve(&[EndpointKind::Sql], "prod", &segments, "GET"),
            Resolution::EnvironmentNotAllowed(_)
        ));
        assert!(matches!(
            registry.resolve(&[EndpointKind::Sql], "dev", &segments, "DELETE"),
            Resolution::MethodNotAllowed(_)
        ));
    }

    #[tokio::test]
    async fn reload_publishes_change_events() {
        let dir = TempDir::new().expect("tempdir");
        write_entity(
            dir.path(),
            "SQL",
            "Products",
            r#"{"DatabaseObjectName": "Items"}"#,
        );
        let bus = EventBus::with_queue_depth(16);
        let registry = EndpointRegistry::load(dir.path(), vec!["prod".to_string()], bus.clone())
            .expect("registry");

        let mut feed = bus.subscribe();
        write_entity(
            dir.path(),
            "SQL",
            "Orders",
            r#"{"DatabaseObjectName": "OrderHeaders"}"#,
        );
        registry.reload_kind(EndpointKind::Sql);

        let mut changes = Vec::new();
        for _ in 0..2 {
            let envelope =
                tokio::time::timeout(std::time::Duration::from_millis(200), feed.next())
                    .await
                    .expect("event within deadline")
                    .expect("open feed");
            changes.push(envelope.event);
        }
        assert!(changes.iter().any(|event| matches!(
            event,
            Event::EndpointChanged {
                change: ChangeKind::Created,
                ..
            }
        )));

        let snapshot = registry.snapshot();
        assert!(snapshot.get(EndpointKind::Sql, "orders").is_some());
        assert!(snapshot.get(EndpointKind::Sql, "products").is_some());
    }

    #[test]
    fn tvf_requires_contiguous_path_positions() {
        let dir = TempDir::new().expect("tempdir");
        write_entity(
            dir.path(),
            "SQL",
            "EmployeeReport",
            r#"{
                "DatabaseObjectName": "EmployeeReport",
                "ObjectType": "TableValuedFunction",
                "FunctionParameters": [
                    {"Name": "CustomerId", "SqlType": "int", "Source": "Path", "Position": 2, "Required": true}
                ]
            }"#,
        );
        let registry = registry(dir.path());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn list_excludes_private_and_foreign_environment_endpoints() {
        let dir = TempDir::new().expect("tempdir");
        write_entity(
            dir.path(),
            "SQL",
            "Hidden",
            r#"{"DatabaseObjectName": "X", "IsPrivate": true}"#,
        );
        write_entity(
            dir.path(),
            "SQL",
            "DevOnly",
            r#"{"DatabaseObjectName": "Y", "AllowedEnvironments": ["dev"]}"#,
        );
        write_entity(dir.path(), "SQL", "Open", r#"{"DatabaseObjectName": "Z"}"#);

        let registry = registry(dir.path());
        let listed = registry.list("prod");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Open");
    }
}
