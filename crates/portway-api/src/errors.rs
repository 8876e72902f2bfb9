//! API error envelope and taxonomy mapping.
//!
//! Engine crates return typed errors; the dispatcher maps them onto the
//! wire envelope `{"success": false, "error": …, "details"?: …}` and the
//! matching status code. User-visible details never carry SQL text,
//! connection strings, or secret values.

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::{IntoResponse, Response};
use portway_composite::CompositeError;
use portway_config::ConfigError;
use portway_files::FileError;
use portway_proxy::ProxyError;
use portway_sql::SqlError;
use serde::Serialize;

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) success: bool,
    pub(crate) error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) details: Option<String>,
}

/// Structured API error carrying the envelope and status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    details: Option<String>,
    retry_after: Option<Duration>,
}

impl ApiError {
    fn new(status: StatusCode, error: &str) -> Self {
        Self {
            status,
            error: error.to_string(),
            details: None,
            retry_after: None,
        }
    }

    /// Attach a caller-safe detail string.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// 401 with a `FailedAuth` envelope.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "FailedAuth")
    }

    /// 403 with an `AuthorizationFailed` envelope.
    #[must_use]
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "AuthorizationFailed")
    }

    /// 404 for unknown endpoints, environments, or files.
    #[must_use]
    pub fn not_found(error: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// 405 for endpoints that do not allow the verb.
    #[must_use]
    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed")
    }

    /// 429 with a `Retry-After` header.
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        let mut error = Self::new(StatusCode::TOO_MANY_REQUESTS, "RateLimited");
        error.retry_after = Some(retry_after);
        error
    }

    /// 400 with the given taxonomy name.
    #[must_use]
    pub fn bad_request(error: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// 500 with a generic body; detail belongs in the logs only.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected")
    }

    /// 500 naming an operator-visible configuration failure.
    #[must_use]
    pub fn configuration(error: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// 503 for unavailable backends.
    #[must_use]
    pub fn service_unavailable(error: &str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error)
    }

    /// 504 for backend timeouts.
    #[must_use]
    pub fn gateway_timeout(error: &str) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, error)
    }

    /// 502 for unreachable upstreams.
    #[must_use]
    pub fn bad_gateway(error: &str) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, error)
    }

    /// The mapped status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The taxonomy name in the envelope.
    #[must_use]
    pub fn error_name(&self) -> &str {
        &self.error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            success: false,
            error: self.error,
            details: self.details,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            let seconds = retry_after.as_secs().max(1).to_string();
            if let Ok(value) = seconds.parse::<axum::http::HeaderValue>() {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<SqlError> for ApiError {
    fn from(err: SqlError) -> Self {
        match err {
            SqlError::QuerySyntax { detail } => {
                Self::bad_request("QuerySyntax").with_details(detail)
            }
            SqlError::InvalidField { field } => {
                Self::bad_request("InvalidField").with_details(field)
            }
            SqlError::TypeMismatch { field, expected } => Self::bad_request("TypeMismatch")
                .with_details(format!("field '{field}' does not coerce to {expected}")),
            SqlError::MissingParameter { name } => {
                Self::bad_request("MissingParameter").with_details(name)
            }
            SqlError::EndpointMisconfigured { reason } => {
                Self::configuration("ConfigInvalid").with_details(reason)
            }
            SqlError::RowConflict { message } => {
                Self::new(StatusCode::CONFLICT, "RowConflict").with_details(message)
            }
            SqlError::DbUnavailable { .. } => Self::service_unavailable("DbUnavailable"),
            SqlError::Timeout { .. } => Self::gateway_timeout("DbTimeout"),
            SqlError::Database { .. } => Self::internal(),
        }
    }
}

impl From<FileError> for ApiError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::FileTooLarge { size, max } => Self::bad_request("FileTooLarge")
                .with_details(format!("{size} bytes exceeds the {max} byte limit")),
            FileError::ExtensionDenied { extension } => {
                Self::bad_request("ExtensionDenied").with_details(extension)
            }
            FileError::FileExists { path } => Self::bad_request("FileExists").with_details(path),
            FileError::PathEscape { .. } => Self::bad_request("PathEscape"),
            FileError::FileNotFound { .. } | FileError::InvalidFileId { .. } => {
                Self::not_found("FileNotFound")
            }
            FileError::Io { .. } => Self::internal(),
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::UpstreamUnavailable { .. } => Self::bad_gateway("UpstreamUnavailable"),
            ProxyError::UpstreamTimeout => Self::gateway_timeout("UpstreamTimeout"),
            ProxyError::InvalidUpstreamUrl { .. } | ProxyError::TranslationInvalid { .. } => {
                Self::configuration("ConfigInvalid")
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::EnvironmentNotAllowed { .. } => Self::not_found("EnvironmentNotAllowed"),
            ConfigError::EnvironmentMisconfigured { .. } => {
                Self::configuration("EnvironmentMisconfigured")
            }
            ConfigError::SettingsDecryptionUnavailable
            | ConfigError::SettingsDecryptionFailed { .. } => {
                Self::configuration("SettingsDecryptionUnavailable")
            }
            ConfigError::ConfigInvalid { .. }
            | ConfigError::MalformedJson { .. }
            | ConfigError::WatcherSetup { .. }
            | ConfigError::Io { .. } => Self::configuration("ConfigInvalid"),
        }
    }
}

impl From<CompositeError> for ApiError {
    fn from(err: CompositeError) -> Self {
        match err {
            CompositeError::TemplateError { expression, .. } => {
                Self::bad_request("CompositeTemplateError").with_details(expression)
            }
            CompositeError::InvalidStepInput { step, reason } => {
                Self::bad_request("CompositeTemplateError")
                    .with_details(format!("step '{step}': {reason}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_the_documented_statuses() {
        assert_eq!(
            ApiError::from(SqlError::QuerySyntax {
                detail: "x".to_string()
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SqlError::Timeout { operation: "q" }).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(FileError::FileNotFound {
                file_id: "x".to_string()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ProxyError::UpstreamTimeout).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(ConfigError::EnvironmentNotAllowed {
                name: "shadow".to_string()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn internal_errors_carry_no_backend_detail() {
        let err = ApiError::internal();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_name(), "Unexpected");
        assert!(err.details.is_none());

        let unavailable = ApiError::from(SqlError::DbUnavailable {
            operation: "connect",
            detail: "Server=secret-host;Password=x".to_string(),
        });
        assert!(unavailable.details.is_none());
    }
}
