//! Error types for upstream forwarding.

use thiserror::Error;

/// Primary error type for the proxy engine.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Upstream connection or DNS failure.
    #[error("upstream unavailable")]
    UpstreamUnavailable {
        /// Transport error rendered as text.
        detail: String,
    },
    /// Upstream exceeded the forwarding deadline.
    #[error("upstream timed out")]
    UpstreamTimeout,
    /// The endpoint's upstream URL or suffix does not form a valid URL.
    #[error("invalid upstream URL")]
    InvalidUpstreamUrl {
        /// The offending URL text.
        url: String,
    },
    /// A method translation or append-header declaration is malformed.
    #[error("invalid method translation")]
    TranslationInvalid {
        /// What the parser rejected.
        detail: String,
    },
}

/// Convenience alias for proxy results.
pub type ProxyResult<T> = Result<T, ProxyError>;
