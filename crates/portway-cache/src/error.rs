//! Error types for cache backend operations.

use thiserror::Error;

/// Primary error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable or command failed.
    #[error("cache backend unavailable")]
    Unavailable {
        /// Operation identifier.
        operation: &'static str,
        /// Backend error rendered as text.
        detail: String,
    },
    /// Backend operation exceeded its deadline.
    #[error("cache operation timed out")]
    Timeout {
        /// Operation identifier.
        operation: &'static str,
    },
}

/// Convenience alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;
