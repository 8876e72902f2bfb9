//! HTTP handlers for file endpoints.
//!
//! Shapes: `POST /api/{env}/files/{endpoint}` (multipart upload),
//! `GET /api/{env}/files/{endpoint}/list[?prefix=…]`,
//! `GET /api/{env}/files/{endpoint}/{fileId}`, and the matching `DELETE`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use portway_config::EndpointPayload;
use portway_events::EndpointKind;
use serde_json::json;

use crate::auth::RequestIdentity;
use crate::dispatch::{
    check_environment_exists, check_environment_grant, check_scope, split_segments,
    unpack_resolution,
};
use crate::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn files_upload(
    State(state): State<Arc<ApiState>>,
    Path((environment, rest)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Extension(identity): Extension<RequestIdentity>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let (environment, endpoint, remainder) =
        resolve_file_endpoint(&state, &identity, &environment, &rest, "POST")?;
    if !remainder.is_empty() {
        return Err(ApiError::not_found("NotFound"));
    }

    let allowed_extensions = match &endpoint.payload {
        EndpointPayload::File(file) => file.allowed_extensions.clone(),
        _ => return Err(ApiError::not_found("NotFound")),
    };
    let overwrite = params
        .get("overwrite")
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));

    let (file_name, content) = read_upload(&mut multipart).await?;
    let metadata = state
        .files
        .upload(&environment, &file_name, content, overwrite, &allowed_extensions)
        .await?;
    Ok((StatusCode::OK, Json(json!({ "fileId": metadata.file_id }))).into_response())
}

pub(crate) async fn files_get(
    State(state): State<Arc<ApiState>>,
    Path((environment, rest)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Extension(identity): Extension<RequestIdentity>,
) -> Result<Response, ApiError> {
    let (environment, _endpoint, remainder) =
        resolve_file_endpoint(&state, &identity, &environment, &rest, "GET")?;

    match remainder.split_first() {
        Some((first, [])) if first == "list" => {
            let prefix = params.get("prefix").map(String::as_str);
            let files = state.files.list(&environment, prefix);
            Ok((StatusCode::OK, Json(files)).into_response())
        }
        Some((file_id, [])) => {
            let (metadata, content) = state.files.download(&environment, file_id).await?;
            Ok((
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, metadata.content_type)],
                content,
            )
                .into_response())
        }
        _ => Err(ApiError::not_found("NotFound")),
    }
}

pub(crate) async fn files_delete(
    State(state): State<Arc<ApiState>>,
    Path((environment, rest)): Path<(String, String)>,
    Extension(identity): Extension<RequestIdentity>,
) -> Result<Response, ApiError> {
    let (environment, _endpoint, remainder) =
        resolve_file_endpoint(&state, &identity, &environment, &rest, "DELETE")?;
    let [file_id] = remainder.as_slice() else {
        return Err(ApiError::not_found("NotFound"));
    };
    state.files.delete(&environment, file_id).await?;
    Ok((StatusCode::OK, Json(json!({ "success": true }))).into_response())
}

fn resolve_file_endpoint(
    state: &ApiState,
    identity: &RequestIdentity,
    environment: &str,
    rest: &str,
    method: &str,
) -> Result<
    (
        String,
        Arc<portway_config::EndpointDefinition>,
        Vec<String>,
    ),
    ApiError,
> {
    let environment = check_environment_exists(state, environment)?;
    let segments = split_segments(rest);
    if segments.is_empty() {
        return Err(ApiError::not_found("NotFound"));
    }
    let resolution =
        state
            .endpoints
            .resolve(&[EndpointKind::File], &environment, &segments, method);
    let (definition, remainder) = unpack_resolution(state, identity, &environment, resolution)?;
    check_scope(state, identity, &environment, &definition)?;
    check_environment_grant(state, identity, &environment)?;
    Ok((environment, definition, remainder))
}

async fn read_upload(multipart: &mut Multipart) -> Result<(String, Bytes), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request("QuerySyntax").with_details(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("QuerySyntax").with_details("missing file name"))?;
        let content = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request("QuerySyntax").with_details(err.to_string()))?;
        return Ok((file_name, content));
    }
    Err(ApiError::bad_request("QuerySyntax").with_details("multipart field 'file' is required"))
}
