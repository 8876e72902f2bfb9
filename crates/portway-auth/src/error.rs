//! Error types for token storage and verification.

use thiserror::Error;

/// Primary error type for authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Underlying database operation failed.
    #[error("token database operation failed")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Source database error.
        source: sqlx::Error,
    },
    /// Stored hash or salt payload could not be decoded.
    #[error("stored token material is invalid")]
    StoredMaterialInvalid {
        /// Token row the invalid material belongs to.
        token_id: i64,
    },
    /// Background hashing task was cancelled or panicked.
    #[error("hash verification task failed")]
    HashTaskFailed,
}

/// Convenience alias for authentication results.
pub type AuthResult<T> = Result<T, AuthError>;
