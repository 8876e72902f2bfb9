//! Liveness and readiness endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::state::ApiState;

pub(crate) async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "healthy" }))).into_response()
}

pub(crate) async fn health_live() -> Response {
    (StatusCode::OK, Json(json!({ "status": "alive" }))).into_response()
}

/// Component-level readiness, authenticated like any API surface.
pub(crate) async fn health_details(State(state): State<Arc<ApiState>>) -> Response {
    let endpoint_count = state.endpoints.snapshot().len();
    let token_count = state.tokens.token_count().await.ok();
    let cache_degraded = state
        .cache_failover
        .as_ref()
        .is_some_and(|failover| failover.is_degraded());

    let healthy = token_count.is_some() && !cache_degraded;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "components": {
            "endpoints": { "count": endpoint_count },
            "authDatabase": {
                "reachable": token_count.is_some(),
                "tokens": token_count,
            },
            "cache": {
                "provider": state.cache.name(),
                "degraded": cache_degraded,
            },
            "fileMemoryCacheBytes": state.files.memory_usage_bytes(),
        },
        "environments": state.environments.allow_list(),
    });
    (status, Json(body)).into_response()
}
