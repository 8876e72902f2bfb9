//! Bearer-token authentication middleware.
//!
//! Applies the per-IP bucket, verifies the presented token against the
//! store, applies the per-token bucket, and attaches the resolved
//! authorization context. Scope and environment checks happen in the
//! dispatcher, which knows the target endpoint. Audit rows are queued
//! asynchronously and never block the response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use portway_auth::{AuditOperation, AuditRecord, AuthContext};
use serde_json::json;
use tracing::{error, warn};

use crate::errors::ApiError;
use crate::state::ApiState;

/// Longest token prefix allowed into logs and audit payloads.
const TOKEN_LOG_PREFIX: usize = 8;

pub(crate) async fn require_bearer(
    State(state): State<Arc<ApiState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let client_ip = client_ip(&req);
    let user_agent = header_value(&req, "user-agent");

    let ip_admission = state.ip_limiter.admit(&client_ip);
    if !ip_admission.allowed {
        warn!(ip = %client_ip, "per-IP rate limit exceeded");
        return Err(ApiError::rate_limited(ip_admission.retry_after));
    }

    let Some(token) = bearer_token(&req) else {
        state.audit.record(
            AuditRecord::now(
                "anonymous",
                AuditOperation::FailedAuth,
                json!({"Reason": "missing or malformed bearer token"}),
            )
            .with_client(Some(client_ip), user_agent),
        );
        return Err(ApiError::unauthenticated());
    };

    let context = state.tokens.authenticate(&token).await.map_err(|err| {
        error!(error = %err, "token verification failed");
        ApiError::internal()
    })?;

    let Some(context) = context else {
        let prefix: String = token.chars().take(TOKEN_LOG_PREFIX).collect();
        state.audit.record(
            AuditRecord::now(
                "anonymous",
                AuditOperation::FailedAuth,
                json!({"Reason": "token did not match any active token", "TokenPrefix": prefix}),
            )
            .with_client(Some(client_ip), user_agent),
        );
        return Err(ApiError::unauthenticated());
    };

    let token_admission = state.token_limiter.admit(&context.token_id.to_string());
    if !token_admission.allowed {
        warn!(
            token_id = context.token_id,
            username = %context.username,
            "per-token rate limit exceeded"
        );
        return Err(ApiError::rate_limited(token_admission.retry_after));
    }

    req.extensions_mut().insert(RequestIdentity {
        auth: context,
        client_ip,
        user_agent,
    });
    Ok(next.run(req).await)
}

/// Authenticated request identity attached as a request extension.
#[derive(Clone)]
pub(crate) struct RequestIdentity {
    pub(crate) auth: AuthContext,
    pub(crate) client_ip: String,
    pub(crate) user_agent: Option<String>,
}

fn bearer_token(req: &Request<axum::body::Body>) -> Option<String> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn client_ip(req: &Request<axum::body::Body>) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string())
}

fn header_value(req: &Request<axum::body::Body>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
