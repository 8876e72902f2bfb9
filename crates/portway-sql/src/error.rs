//! Error types for query translation and execution.

use thiserror::Error;

/// Primary error type for the SQL engine.
#[derive(Debug, Error)]
pub enum SqlError {
    /// Query expression could not be parsed.
    #[error("query syntax error")]
    QuerySyntax {
        /// What the parser rejected.
        detail: String,
    },
    /// A referenced field is not an exposed alias.
    #[error("unknown field")]
    InvalidField {
        /// The offending field name.
        field: String,
    },
    /// A literal does not coerce to the column's SQL type.
    #[error("type mismatch")]
    TypeMismatch {
        /// Field whose value failed coercion.
        field: String,
        /// Declared SQL type of the column.
        expected: String,
    },
    /// A required parameter is absent.
    #[error("missing parameter")]
    MissingParameter {
        /// Declared parameter name.
        name: String,
    },
    /// The endpoint's configuration cannot serve the request.
    #[error("endpoint misconfigured")]
    EndpointMisconfigured {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// Backend raised a business conflict (RAISERROR severity >= 16).
    #[error("row conflict")]
    RowConflict {
        /// Backend-provided conflict message.
        message: String,
    },
    /// Backend unreachable.
    #[error("database unavailable")]
    DbUnavailable {
        /// Operation identifier.
        operation: &'static str,
        /// Backend error rendered as text.
        detail: String,
    },
    /// Statement exceeded its deadline.
    #[error("database operation timed out")]
    Timeout {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Underlying driver error not covered above.
    #[error("database operation failed")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Source driver error.
        source: sqlx::Error,
    },
}

/// Convenience alias for SQL engine results.
pub type SqlResult<T> = Result<T, SqlError>;
