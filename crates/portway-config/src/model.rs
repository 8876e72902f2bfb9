//! Endpoint and environment data model.
//!
//! Definition files on disk use the PascalCase field names of the original
//! deployment format (`entity.json`, `settings.json`); the raw serde shapes
//! here are validated into the domain types consumed by the engines.

use std::collections::{BTreeMap, HashSet};

use portway_events::EndpointKind;
use serde::Deserialize;
use serde_json::Value;

use crate::crypto::SecretString;
use crate::error::{ConfigError, ConfigResult};

/// HTTP verbs an endpoint may allow, including the `MERGE` extension.
pub const SUPPORTED_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "MERGE", "HEAD", "OPTIONS",
];

/// Database object category behind a SQL endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SqlObjectType {
    /// Plain table.
    Table,
    /// View.
    View,
    /// Table-valued function callable as a read-only endpoint.
    TableValuedFunction,
    /// Stored procedure handling mutations.
    StoredProcedure,
}

/// Where a table-valued-function parameter value is sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ParameterSource {
    /// Positional URL path segment.
    Path,
    /// Query-string parameter.
    Query,
    /// Request header.
    Header,
}

/// One declared parameter of a table-valued function endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TvfParameter {
    /// Parameter name as exposed to callers and bound to SQL.
    pub name: String,
    /// Declared SQL type used for coercion.
    pub sql_type: String,
    /// Source location of the value.
    pub source: ParameterSource,
    /// 1-based position for path-sourced parameters.
    #[serde(default)]
    pub position: Option<u8>,
    /// Whether the parameter must be present.
    #[serde(default)]
    pub required: bool,
    /// Fallback value when the parameter is absent.
    #[serde(default)]
    pub default_value: Option<Value>,
}

/// Bijective alias mapping parsed from `AllowedColumns`.
///
/// Each entry is either `"DbName"` (identity) or `"DbName;Alias"`. Aliases are
/// the only names surfaced to callers; database names are the only names sent
/// to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    ordered: Vec<(String, String)>,
}

impl ColumnMapping {
    /// Parse an `AllowedColumns` sequence, enforcing bijectivity.
    ///
    /// # Errors
    ///
    /// Returns a reason string when a database column or alias appears twice.
    pub fn parse(entries: &[String]) -> Result<Self, String> {
        let mut ordered = Vec::with_capacity(entries.len());
        let mut seen_db = HashSet::new();
        let mut seen_alias = HashSet::new();

        for entry in entries {
            let (db, alias) = entry
                .split_once(';')
                .map_or((entry.trim(), entry.trim()), |(db, alias)| {
                    (db.trim(), alias.trim())
                });
            if db.is_empty() || alias.is_empty() {
                return Err(format!("empty column entry '{entry}'"));
            }
            if !seen_db.insert(db.to_ascii_lowercase()) {
                return Err(format!("duplicate database column '{db}'"));
            }
            if !seen_alias.insert(alias.to_ascii_lowercase()) {
                return Err(format!("duplicate alias '{alias}'"));
            }
            ordered.push((db.to_string(), alias.to_string()));
        }

        Ok(Self { ordered })
    }

    /// Database column for a caller-facing alias, if declared.
    #[must_use]
    pub fn db_for_alias(&self, alias: &str) -> Option<&str> {
        self.ordered
            .iter()
            .find(|(_, a)| a.eq_ignore_ascii_case(alias))
            .map(|(db, _)| db.as_str())
    }

    /// Caller-facing alias for a database column, if declared.
    #[must_use]
    pub fn alias_for_db(&self, db: &str) -> Option<&str> {
        self.ordered
            .iter()
            .find(|(d, _)| d.eq_ignore_ascii_case(db))
            .map(|(_, alias)| alias.as_str())
    }

    /// Declared `(database, alias)` pairs in file order.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.ordered
    }

    /// Whether no columns were declared (all columns pass through).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// SQL endpoint payload.
#[derive(Debug, Clone)]
pub struct SqlEndpoint {
    /// Database schema, e.g. `dbo`.
    pub schema: String,
    /// Table, view, or function name.
    pub object_name: String,
    /// Object category.
    pub object_type: SqlObjectType,
    /// Optional primary key column (database name).
    pub primary_key: Option<String>,
    /// Alias mapping parsed from `AllowedColumns`.
    pub columns: ColumnMapping,
    /// Stored procedure handling mutations, when declared.
    pub procedure: Option<String>,
    /// Parameters for table-valued functions.
    pub tvf_parameters: Vec<TvfParameter>,
}

/// Proxy endpoint payload.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    /// Upstream base URL requests are forwarded to.
    pub upstream_url: String,
    /// Whether upstream URLs in responses are rewritten to the public base.
    pub rewrite_response_urls: bool,
}

/// One step of a composite endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompositeStep {
    /// Step name; later steps address results as `$prev.{name}`.
    pub name: String,
    /// Target endpoint executed by this step.
    pub endpoint: String,
    /// HTTP method used for the sub-request.
    pub method: String,
    /// Whether the step iterates an input array.
    #[serde(default)]
    pub is_array: bool,
    /// Body property holding the input array for `is_array` steps.
    #[serde(default)]
    pub array_property: Option<String>,
    /// Body property used as this step's input object.
    #[serde(default)]
    pub source_property: Option<String>,
    /// Field path → template expression overwrites applied before the step.
    #[serde(default)]
    pub template_transformations: BTreeMap<String, String>,
}

/// Composite endpoint payload.
#[derive(Debug, Clone)]
pub struct CompositeEndpoint {
    /// Ordered steps executed against sibling endpoints.
    pub steps: Vec<CompositeStep>,
}

/// File endpoint payload.
#[derive(Debug, Clone)]
pub struct FileEndpoint {
    /// Directory under the file-storage root, when narrower than the default.
    pub base_directory: Option<String>,
    /// Permitted extensions (lowercase, with dot); empty allows any
    /// extension not on the blocked list.
    pub allowed_extensions: Vec<String>,
}

/// Webhook endpoint payload.
#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    /// Target table name.
    pub object_name: String,
    /// Target schema.
    pub schema: String,
    /// Columns accepted from inbound payloads.
    pub columns: ColumnMapping,
}

/// Static endpoint payload.
#[derive(Debug, Clone)]
pub struct StaticEndpoint {
    /// Content file relative to the endpoint directory.
    pub content_file: String,
    /// Explicit content type; guessed from the file name when absent.
    pub content_type: Option<String>,
}

/// Kind-specific endpoint payload.
#[derive(Debug, Clone)]
pub enum EndpointPayload {
    /// Relational endpoint.
    Sql(SqlEndpoint),
    /// HTTP upstream endpoint.
    Proxy(ProxyEndpoint),
    /// Multi-step orchestration endpoint.
    Composite(CompositeEndpoint),
    /// File storage endpoint.
    File(FileEndpoint),
    /// Inbound webhook endpoint.
    Webhook(WebhookEndpoint),
    /// Fixed-content endpoint.
    Static(StaticEndpoint),
}

/// A validated endpoint definition served by the registry.
#[derive(Debug, Clone)]
pub struct EndpointDefinition {
    /// Endpoint name, including any `namespace/` prefix.
    pub name: String,
    /// Namespace directory the definition was found under, if any.
    pub namespace: Option<String>,
    /// Endpoint category.
    pub kind: EndpointKind,
    /// Environments this endpoint is exposed in; empty means all allowed.
    pub allowed_environments: Vec<String>,
    /// Permitted HTTP verbs, uppercase.
    pub allowed_methods: Vec<String>,
    /// Private endpoints are excluded from listings and documentation.
    pub is_private: bool,
    /// Free-form properties (method translation maps, cache overrides, …).
    pub custom_properties: BTreeMap<String, Value>,
    /// Directory the definition was loaded from.
    pub source_dir: std::path::PathBuf,
    /// Kind-specific payload.
    pub payload: EndpointPayload,
}

impl EndpointDefinition {
    /// Whether the endpoint is exposed in the named environment.
    #[must_use]
    pub fn allows_environment(&self, environment: &str) -> bool {
        self.allowed_environments.is_empty()
            || self
                .allowed_environments
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(environment))
    }

    /// Whether the endpoint accepts the given HTTP verb.
    #[must_use]
    pub fn allows_method(&self, method: &str) -> bool {
        self.allowed_methods
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(method))
    }

    /// String custom property, when present.
    #[must_use]
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.custom_properties.get(key).and_then(Value::as_str)
    }

    /// SQL payload accessor.
    #[must_use]
    pub const fn as_sql(&self) -> Option<&SqlEndpoint> {
        match &self.payload {
            EndpointPayload::Sql(sql) => Some(sql),
            _ => None,
        }
    }

    /// Proxy payload accessor.
    #[must_use]
    pub const fn as_proxy(&self) -> Option<&ProxyEndpoint> {
        match &self.payload {
            EndpointPayload::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Composite payload accessor.
    #[must_use]
    pub const fn as_composite(&self) -> Option<&CompositeEndpoint> {
        match &self.payload {
            EndpointPayload::Composite(composite) => Some(composite),
            _ => None,
        }
    }

    /// Webhook payload accessor.
    #[must_use]
    pub const fn as_webhook(&self) -> Option<&WebhookEndpoint> {
        match &self.payload {
            EndpointPayload::Webhook(webhook) => Some(webhook),
            _ => None,
        }
    }
}

/// Raw `entity.json` shape shared by every endpoint kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct RawEntity {
    pub(crate) allowed_environments: Vec<String>,
    pub(crate) allowed_methods: Vec<String>,
    pub(crate) is_private: bool,
    /// Marks a Proxy-directory entity as a composite orchestration.
    #[serde(rename = "Type")]
    pub(crate) entity_type: Option<String>,
    // SQL
    pub(crate) database_schema: Option<String>,
    pub(crate) database_object_name: Option<String>,
    pub(crate) object_type: Option<SqlObjectType>,
    pub(crate) primary_key: Option<String>,
    pub(crate) allowed_columns: Vec<String>,
    pub(crate) procedure: Option<String>,
    pub(crate) function_parameters: Vec<TvfParameter>,
    // Proxy
    pub(crate) url: Option<String>,
    pub(crate) rewrite_response_urls: Option<bool>,
    // Composite
    pub(crate) steps: Vec<CompositeStep>,
    // Files
    pub(crate) base_directory: Option<String>,
    pub(crate) allowed_extensions: Vec<String>,
    // Static
    pub(crate) content_file: Option<String>,
    pub(crate) content_type: Option<String>,
    /// Everything else lands in `custom_properties`.
    #[serde(flatten)]
    pub(crate) custom_properties: BTreeMap<String, Value>,
}

pub(crate) fn validate_methods(path: &str, methods: &[String]) -> ConfigResult<Vec<String>> {
    let mut validated = Vec::with_capacity(methods.len());
    for method in methods {
        let upper = method.trim().to_ascii_uppercase();
        if !SUPPORTED_METHODS.contains(&upper.as_str()) {
            return Err(ConfigError::ConfigInvalid {
                path: path.to_string(),
                reason: format!("unsupported HTTP method '{method}'"),
            });
        }
        if !validated.contains(&upper) {
            validated.push(upper);
        }
    }
    Ok(validated)
}

/// Global allow-list file (`environments/settings.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalSettings {
    /// Environment names the gateway will serve.
    #[serde(rename = "AllowedEnvironments", alias = "allowedEnvironments")]
    pub allowed_environments: Vec<String>,
}

/// Per-environment settings file (`environments/{env}/settings.json`).
///
/// Older deployments wrap the same fields in a `Settings` object; both
/// shapes parse, with top-level fields winning over nested ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    /// Logical database/server host name injected into headers.
    pub server_name: Option<String>,
    /// Backend connection string; mandatory.
    pub connection_string: Option<SecretString>,
    /// Extra headers injected into proxied requests.
    pub headers: BTreeMap<String, String>,
}

impl EnvironmentSettings {
    /// Parse a settings body, accepting the flat shape and the legacy
    /// `Settings`-wrapped shape.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error for malformed bodies.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        let raw: RawEnvironmentSettings = serde_json::from_str(body)?;
        Ok(raw.flatten())
    }

    const fn empty() -> Self {
        Self {
            server_name: None,
            connection_string: None,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct RawEnvironmentSettings {
    server_name: Option<String>,
    connection_string: Option<SecretString>,
    headers: BTreeMap<String, String>,
    /// Legacy wrapper carrying the same fields one level down.
    settings: Option<Box<RawEnvironmentSettings>>,
}

impl RawEnvironmentSettings {
    fn flatten(self) -> EnvironmentSettings {
        let nested = self
            .settings
            .map_or_else(EnvironmentSettings::empty, |inner| inner.flatten());
        let mut headers = nested.headers;
        headers.extend(self.headers);
        EnvironmentSettings {
            server_name: self.server_name.or(nested.server_name),
            connection_string: self.connection_string.or(nested.connection_string),
            headers,
        }
    }
}

/// Resolved environment served to the engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Case-insensitive environment name.
    pub name: String,
    /// Server display name.
    pub server_name: String,
    /// Backend connection string, masked in logs.
    pub connection_string: SecretString,
    /// Headers injected into backend requests. Always carries at least
    /// `DatabaseName` and `ServerName`.
    pub headers: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_mapping_parses_identity_and_alias_entries() {
        let mapping = ColumnMapping::parse(&[
            "ItemCode;ProductNumber".to_string(),
            "LongDescription;Description".to_string(),
            "Assortment".to_string(),
        ])
        .expect("mapping");

        assert_eq!(mapping.db_for_alias("ProductNumber"), Some("ItemCode"));
        assert_eq!(mapping.alias_for_db("LongDescription"), Some("Description"));
        assert_eq!(mapping.db_for_alias("Assortment"), Some("Assortment"));
        assert_eq!(mapping.db_for_alias("ItemCode"), None);
    }

    #[test]
    fn column_mapping_round_trips_aliases() {
        let mapping = ColumnMapping::parse(&[
            "ItemCode;ProductNumber".to_string(),
            "Assortment;AssortmentCode".to_string(),
        ])
        .expect("mapping");

        for (_, alias) in mapping.pairs() {
            let db = mapping.db_for_alias(alias).expect("db");
            assert_eq!(mapping.alias_for_db(db), Some(alias.as_str()));
        }
    }

    #[test]
    fn column_mapping_rejects_duplicate_alias() {
        let err = ColumnMapping::parse(&["A;X".to_string(), "B;x".to_string()])
            .expect_err("duplicate alias");
        assert!(err.contains("duplicate alias"));
    }

    #[test]
    fn validate_methods_rejects_unknown_verbs() {
        let err = validate_methods("entity.json", &["GET".to_string(), "BREW".to_string()])
            .expect_err("unsupported verb");
        assert!(matches!(err, ConfigError::ConfigInvalid { .. }));
    }

    #[test]
    fn validate_methods_uppercases_and_dedupes() {
        let methods = validate_methods(
            "entity.json",
            &["get".to_string(), "GET".to_string(), "merge".to_string()],
        )
        .expect("methods");
        assert_eq!(methods, vec!["GET".to_string(), "MERGE".to_string()]);
    }

    #[test]
    fn environment_settings_reload_is_stable() {
        let body = r#"{"ServerName":"sql01","ConnectionString":"Server=db;Password=x","Headers":{"Company":"60093"}}"#;
        let first = EnvironmentSettings::parse(body).expect("first");
        let second = EnvironmentSettings::parse(body).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn environment_settings_accept_the_legacy_nested_shape() {
        let body = r#"{"Settings":{"ServerName":"sql01","ConnectionString":"Server=db","Headers":{"Company":"60093"}}}"#;
        let settings = EnvironmentSettings::parse(body).expect("nested");
        assert_eq!(settings.server_name.as_deref(), Some("sql01"));
        assert!(settings.connection_string.is_some());
        assert_eq!(settings.headers.get("Company"), Some(&"60093".to_string()));
    }

    #[test]
    fn top_level_settings_fields_win_over_nested_ones() {
        let body = r#"{
            "ConnectionString": "Server=new-db",
            "Headers": {"Company": "70000"},
            "Settings": {"ServerName": "sql01", "ConnectionString": "Server=old-db", "Headers": {"Company": "60093", "Region": "EU"}}
        }"#;
        let settings = EnvironmentSettings::parse(body).expect("mixed");
        assert!(
            settings
                .connection_string
                .as_ref()
                .is_some_and(|value| value.expose().contains("new-db"))
        );
        assert_eq!(settings.server_name.as_deref(), Some("sql01"));
        assert_eq!(settings.headers.get("Company"), Some(&"70000".to_string()));
        assert_eq!(settings.headers.get("Region"), Some(&"EU".to_string()));
    }
}
