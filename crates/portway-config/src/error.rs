//! Error types for registry and settings operations.

use std::io;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An endpoint definition file failed schema or invariant validation.
    #[error("invalid endpoint definition")]
    ConfigInvalid {
        /// Path of the offending definition file.
        path: String,
        /// Machine-readable reason for the failure.
        reason: String,
    },
    /// The named environment is not present in the global allow-list.
    #[error("environment not allowed")]
    EnvironmentNotAllowed {
        /// Environment name supplied by the caller.
        name: String,
    },
    /// An environment settings file is missing a mandatory field.
    #[error("environment misconfigured")]
    EnvironmentMisconfigured {
        /// Environment name.
        name: String,
        /// Field that was missing or invalid.
        field: &'static str,
    },
    /// Settings arrived encrypted but no private key is available.
    #[error("settings decryption unavailable")]
    SettingsDecryptionUnavailable,
    /// An encrypted settings payload could not be decrypted.
    #[error("settings decryption failed")]
    SettingsDecryptionFailed {
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// The filesystem watcher could not be established.
    #[error("watcher setup failed")]
    WatcherSetup {
        /// Source watcher error rendered as text.
        detail: String,
    },
    /// Definition or settings payload was not valid JSON.
    #[error("malformed JSON payload")]
    MalformedJson {
        /// Path of the offending file.
        path: String,
        /// Source parse error.
        source: serde_json::Error,
    },
    /// File system operation failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
