//! Request dispatch: URL parsing, authorization checks, endpoint execution.
//!
//! One URL shape drives everything: `/api/{environment}/{endpointPath}…`.
//! The dispatcher resolves the environment, enforces the token's environment
//! and scope grants (auditing denials), captures an endpoint snapshot for
//! the life of the request, and hands off to the engine matching the
//! endpoint's kind.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use portway_auth::{AuditOperation, AuditRecord};
use portway_composite::{CompositeOrchestrator, StepRunner};
use portway_config::{
    EndpointDefinition, EndpointPayload, Environment, Resolution, SqlObjectType,
};
use portway_events::EndpointKind;
use portway_proxy::ProxyRequest;
use portway_sql::QueryOptions;
use serde_json::{Value, json};
use tracing::debug;

use crate::auth::RequestIdentity;
use crate::errors::ApiError;
use crate::runner::DispatchRunner;
use crate::state::{ApiState, auth_context_hash};

/// Kinds served by the generic `/api/{env}/{endpoint}` shape.
const GENERIC_KINDS: &[EndpointKind] =
    &[EndpointKind::Sql, EndpointKind::Proxy, EndpointKind::Static];

pub(crate) async fn dispatch_generic(
    State(state): State<Arc<ApiState>>,
    Path((environment, rest)): Path<(String, String)>,
    Extension(identity): Extension<RequestIdentity>,
    req: Request<axum::body::Body>,
) -> Result<Response, ApiError> {
    let environment = check_environment_exists(&state, &environment)?;
    let segments = split_segments(&rest);
    let method = req.method().as_str().to_string();

    let resolution = state
        .endpoints
        .resolve(GENERIC_KINDS, &environment, &segments, &method);
    let (definition, remainder) = unpack_resolution(&state, &identity, &environment, resolution)?;
    check_scope(&state, &identity, &environment, &definition)?;
    check_environment_grant(&state, &identity, &environment)?;

    let env = state.environments.get(&environment).await?;
    let public_base = public_base(req.headers(), &environment, &definition.name);
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|_err| ApiError::bad_request("QuerySyntax"))?;

    match &definition.payload {
        EndpointPayload::Sql(sql) => {
            execute_sql(
                &state, &definition, sql, &env, &method, &uri, &headers, &remainder, &body,
                &public_base,
            )
            .await
        }
        EndpointPayload::Proxy(proxy) => {
            let request = ProxyRequest {
                method,
                path_suffix: remainder,
                query: uri.query().map(str::to_string),
                headers: lowercase_headers(&headers),
                body,
                public_base,
                auth_context_hash: auth_context_hash(
                    identity.auth.token_id,
                    &identity.auth.username,
                ),
            };
            let response = state.proxy.execute(&definition, proxy, &env, request).await?;
            Ok(proxied_to_response(response))
        }
        EndpointPayload::Static(static_endpoint) => {
            serve_static(&definition, static_endpoint).await
        }
        _ => Err(ApiError::not_found("NotFound")),
    }
}

pub(crate) async fn dispatch_composite(
    State(state): State<Arc<ApiState>>,
    Path((environment, name)): Path<(String, String)>,
    Extension(identity): Extension<RequestIdentity>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let environment = check_environment_exists(&state, &environment)?;
    let segments = vec![name];

    let resolution =
        state
            .endpoints
            .resolve(&[EndpointKind::Composite], &environment, &segments, "POST");
    let (definition, _) = unpack_resolution(&state, &identity, &environment, resolution)?;
    check_scope(&state, &identity, &environment, &definition)?;
    check_environment_grant(&state, &identity, &environment)?;
    let Some(composite) = definition.as_composite() else {
        return Err(ApiError::not_found("NotFound"));
    };

    let env = state.environments.get(&environment).await?;
    let runner: Arc<dyn StepRunner> = Arc::new(DispatchRunner::new(
        state.clone(),
        env,
        identity.clone(),
        scheme_and_host(&headers),
        environment.clone(),
    ));
    let orchestrator = CompositeOrchestrator::new(runner);
    let outcome = orchestrator.execute(composite, &body).await;

    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    debug!(endpoint = %definition.name, success = outcome.is_success(), "composite finished");
    Ok((status, Json(outcome.envelope())).into_response())
}

pub(crate) async fn dispatch_webhook(
    State(state): State<Arc<ApiState>>,
    Path((environment, name)): Path<(String, String)>,
    Extension(identity): Extension<RequestIdentity>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let environment = check_environment_exists(&state, &environment)?;
    let segments = vec![name];

    let resolution =
        state
            .endpoints
            .resolve(&[EndpointKind::Webhook], &environment, &segments, "POST");
    let (definition, _) = unpack_resolution(&state, &identity, &environment, resolution)?;
    check_scope(&state, &identity, &environment, &definition)?;
    check_environment_grant(&state, &identity, &environment)?;
    let Some(webhook) = definition.as_webhook() else {
        return Err(ApiError::not_found("NotFound"));
    };

    let env = state.environments.get(&environment).await?;
    let executor = state.executor_for(&env).await?;
    let result = state
        .sql
        .persist_webhook(executor.as_ref(), &definition.name, webhook, &body)
        .await?;
    Ok((StatusCode::OK, Json(result)).into_response())
}

/// Environment existence, shared by every dispatch path: the global
/// allow-list decides 404 before any endpoint work happens.
pub(crate) fn check_environment_exists(
    state: &ApiState,
    environment: &str,
) -> Result<String, ApiError> {
    if state.environments.is_allowed(environment) {
        Ok(environment.to_string())
    } else {
        Err(ApiError::not_found("EnvironmentNotAllowed"))
    }
}

/// The token's environment grants. Evaluated after the endpoint scope
/// check, so a token denied on both fails (and audits) as a scope denial.
pub(crate) fn check_environment_grant(
    state: &ApiState,
    identity: &RequestIdentity,
    environment: &str,
) -> Result<(), ApiError> {
    if identity.auth.environments.matches(environment) {
        return Ok(());
    }
    state.audit.record(
        AuditRecord::now(
            identity.auth.username.clone(),
            AuditOperation::AuthorizationFailed,
            json!({
                "ResourceType": "Environment",
                "ResourceName": environment,
                "availableScopes": identity.auth.scopes.as_raw(),
                "availableEnvironments": identity.auth.environments.as_raw(),
            }),
        )
        .with_token_id(identity.auth.token_id)
        .with_client(Some(identity.client_ip.clone()), identity.user_agent.clone()),
    );
    Err(ApiError::forbidden())
}

/// Scope check with the audited denial shape.
pub(crate) fn check_scope(
    state: &ApiState,
    identity: &RequestIdentity,
    environment: &str,
    definition: &EndpointDefinition,
) -> Result<(), ApiError> {
    if identity.auth.scopes.matches(&definition.name) {
        return Ok(());
    }
    state.audit.record(
        AuditRecord::now(
            identity.auth.username.clone(),
            AuditOperation::AuthorizationFailed,
            json!({
                "ResourceType": "Endpoint",
                "ResourceName": definition.name,
                "Environment": environment,
                "availableScopes": identity.auth.scopes.as_raw(),
                "availableEnvironments": identity.auth.environments.as_raw(),
            }),
        )
        .with_token_id(identity.auth.token_id)
        .with_client(Some(identity.client_ip.clone()), identity.user_agent.clone()),
    );
    Err(ApiError::forbidden())
}

pub(crate) fn unpack_resolution(
    state: &ApiState,
    identity: &RequestIdentity,
    environment: &str,
    resolution: Resolution,
) -> Result<(Arc<EndpointDefinition>, Vec<String>), ApiError> {
    match resolution {
        Resolution::Matched {
            definition,
            remainder,
        } => Ok((definition, remainder)),
        Resolution::NotFound => Err(ApiError::not_found("NotFound")),
        Resolution::MethodNotAllowed(_) => Err(ApiError::method_not_allowed()),
        Resolution::EnvironmentNotAllowed(definition) => {
            // The endpoint exists but is not exposed here; hide it, but keep
            // an audit trail of the attempt.
            state.audit.record(
                AuditRecord::now(
                    identity.auth.username.clone(),
                    AuditOperation::AuthorizationFailed,
                    json!({
                        "ResourceType": "Endpoint",
                        "ResourceName": definition.name,
                        "Environment": environment,
                        "Reason": "endpoint not exposed in environment",
                    }),
                )
                .with_token_id(identity.auth.token_id),
            );
            Err(ApiError::not_found("NotFound"))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_sql(
    state: &ApiState,
    definition: &EndpointDefinition,
    sql: &portway_config::SqlEndpoint,
    env: &Arc<Environment>,
    method: &str,
    uri: &Uri,
    headers: &HeaderMap,
    remainder: &[String],
    body: &Bytes,
    public_base: &str,
) -> Result<Response, ApiError> {
    let executor = state.executor_for(env).await?;

    if method == "GET" {
        let pairs = query_pairs(uri)?;
        let options = QueryOptions::parse(
            pairs.iter().map(|(key, value)| (key.as_str(), value.as_str())),
            state.sql.default_top(),
        )?;
        let link_base = link_base_from_public(public_base);

        let response = if sql.object_type == SqlObjectType::TableValuedFunction {
            let query_map: HashMap<String, String> = pairs
                .iter()
                .filter(|(key, _)| !key.starts_with('$'))
                .cloned()
                .collect();
            state
                .sql
                .query_function(
                    executor.as_ref(),
                    &definition.name,
                    sql,
                    remainder,
                    &query_map,
                    &lowercase_headers(headers).into_iter().collect(),
                    &options,
                    &link_base,
                )
                .await?
        } else {
            state
                .sql
                .query(
                    executor.as_ref(),
                    &env.name,
                    &definition.name,
                    sql,
                    &options,
                    &link_base,
                )
                .await?
        };
        return Ok((StatusCode::OK, Json(response)).into_response());
    }

    let payload: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body)
            .map_err(|err| ApiError::bad_request("QuerySyntax").with_details(err.to_string()))?
    };
    let url_key = remainder.first().map(String::as_str);
    let result = state
        .sql
        .mutate(
            executor.as_ref(),
            &definition.name,
            sql,
            method,
            &payload,
            url_key,
        )
        .await?;
    Ok((StatusCode::OK, Json(result)).into_response())
}

async fn serve_static(
    definition: &EndpointDefinition,
    static_endpoint: &portway_config::StaticEndpoint,
) -> Result<Response, ApiError> {
    let path = definition.source_dir.join(&static_endpoint.content_file);
    let content = tokio::fs::read(&path)
        .await
        .map_err(|_err| ApiError::not_found("NotFound"))?;
    let content_type = static_endpoint.content_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&static_endpoint.content_file)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, content_type)],
        content,
    )
        .into_response())
}

pub(crate) fn proxied_to_response(response: portway_proxy::ProxiedResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = builder.header("x-cache", if response.cache_hit { "HIT" } else { "MISS" });
    builder
        .body(axum::body::Body::from(response.body))
        .map_or_else(
            |_err| StatusCode::BAD_GATEWAY.into_response(),
            |response| response.into_response(),
        )
}

pub(crate) fn split_segments(rest: &str) -> Vec<String> {
    rest.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn query_pairs(uri: &Uri) -> Result<Vec<(String, String)>, ApiError> {
    match axum::extract::Query::<Vec<(String, String)>>::try_from_uri(uri) {
        Ok(axum::extract::Query(pairs)) => Ok(pairs),
        Err(_err) => Err(ApiError::bad_request("QuerySyntax")),
    }
}

pub(crate) fn lowercase_headers(headers: &HeaderMap) -> std::collections::BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|text| (name.as_str().to_ascii_lowercase(), text.to_string()))
        })
        .collect()
}

pub(crate) fn scheme_and_host(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

pub(crate) fn public_base(headers: &HeaderMap, environment: &str, endpoint: &str) -> String {
    format!(
        "{}/api/{environment}/{endpoint}",
        scheme_and_host(headers)
    )
}

fn link_base_from_public(public_base: &str) -> String {
    // NextLink is host-relative: strip the scheme and authority.
    public_base
        .find("/api/")
        .map_or_else(|| public_base.to_string(), |index| public_base[index..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_split_and_drop_empties() {
        assert_eq!(
            split_segments("crm/Accounts/detail/"),
            vec!["crm", "Accounts", "detail"]
        );
        assert!(split_segments("").is_empty());
    }

    #[test]
    fn public_base_uses_forwarded_proto_and_host() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "gw.example.com".parse().expect("host"));
        headers.insert("x-forwarded-proto", "https".parse().expect("proto"));
        assert_eq!(
            public_base(&headers, "prod", "Accounts"),
            "https://gw.example.com/api/prod/Accounts"
        );
    }

    #[test]
    fn link_base_is_host_relative() {
        assert_eq!(
            link_base_from_public("https://gw/api/prod/Products"),
            "/api/prod/Products"
        );
    }

    #[test]
    fn query_pairs_decode_filter_expressions() {
        let uri: Uri = "/api/prod/Products?$filter=AssortmentCode%20eq%20%27Books%27&$top=2"
            .parse()
            .expect("uri");
        let pairs = query_pairs(&uri).expect("pairs");
        assert!(pairs.contains(&("$filter".to_string(), "AssortmentCode eq 'Books'".to_string())));
        assert!(pairs.contains(&("$top".to_string(), "2".to_string())));
    }
}
