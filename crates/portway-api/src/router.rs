//! Router construction and server host for the gateway API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::http::Request;
use axum::middleware;
use axum::routing::{any, get, post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::auth::require_bearer;
use crate::dispatch::{dispatch_composite, dispatch_generic, dispatch_webhook};
use crate::files_http::{files_delete, files_get, files_upload};
use crate::health::{health, health_details, health_live};
use crate::state::ApiState;

/// Axum router wrapper hosting the gateway surface.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router over the wired application state.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        let require_auth = middleware::from_fn_with_state(state.clone(), require_bearer);

        let protected = Router::new()
            .route("/health/details", get(health_details))
            .route(
                "/api/{environment}/composite/{name}",
                post(dispatch_composite),
            )
            .route("/api/{environment}/webhook/{name}", post(dispatch_webhook))
            .route(
                "/api/{environment}/files/{*rest}",
                get(files_get).post(files_upload).delete(files_delete),
            )
            .route("/api/{environment}/{*rest}", any(dispatch_generic))
            .route_layer(require_auth);

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty,
                )
            })
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    span.record(
                        "latency_ms",
                        u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    );
                },
            );

        let router = Router::new()
            .route("/health", get(health))
            .route("/health/live", get(health_live))
            .merge(protected)
            .layer(trace_layer)
            .with_state(state);

        Self { router }
    }

    /// Serve the API on the supplied address.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server
    /// terminates unexpectedly.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        tracing::info!("starting gateway API on {addr}");
        let listener = TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// The configured router, for in-process testing.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
