//! Error types for composite orchestration.

use thiserror::Error;

/// Primary error type for composite endpoints.
#[derive(Debug, Error)]
pub enum CompositeError {
    /// A template expression referenced something that does not exist.
    #[error("template resolution failed")]
    TemplateError {
        /// The expression as declared.
        expression: String,
        /// Why it failed to resolve.
        reason: String,
    },
    /// A step's declared input shape does not match the request body.
    #[error("invalid step input")]
    InvalidStepInput {
        /// Step name.
        step: String,
        /// Why the input was rejected.
        reason: String,
    },
}

/// Convenience alias for composite results.
pub type CompositeResult<T> = Result<T, CompositeError>;
