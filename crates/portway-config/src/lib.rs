#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Registries and settings for the Portway gateway.
//!
//! Hosts the endpoint registry (discovered from a filesystem tree and hot
//! reloaded), the environment registry (allow-listed, optionally encrypted
//! settings), the encrypted-settings envelope, and the filesystem watcher
//! that drives reloads. Consumers receive immutable snapshots; nothing here
//! is mutated in place outside a reload.

pub mod crypto;
pub mod endpoints;
pub mod environments;
pub mod error;
pub mod model;
pub mod settings;
pub mod watcher;

pub use crypto::{ENCRYPTION_MARKER, SecretString};
pub use endpoints::{EndpointRegistry, EndpointSnapshot, Resolution};
pub use environments::{EnvironmentRegistry, SecretSource};
pub use error::{ConfigError, ConfigResult};
pub use model::{
    ColumnMapping, CompositeEndpoint, CompositeStep, EndpointDefinition, EndpointPayload,
    Environment, FileEndpoint, ParameterSource, ProxyEndpoint, SqlEndpoint, SqlObjectType,
    StaticEndpoint, TvfParameter, WebhookEndpoint,
};
pub use settings::{DataPaths, GatewaySettings};
pub use watcher::{ChangeStream, WatcherOptions};
