//! `/:account/stor/...` — put, get/head, and delete object handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::pipeline::finalize_auth_context;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedRequest;
use crate::model::{ObjectMetadata, ObjectType};
use crate::state::AppState;

pub async fn put_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let key = format!("/{path}");
    finalize_auth_context(&ctx, vec![])?;

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let durability_level: u32 = headers
        .get("durability-level")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.mpu_min_copies.max(2));

    if durability_level < state.config.mpu_min_copies || durability_level > state.config.mpu_max_copies {
        return Err(AppError::InvalidDurabilityLevel);
    }

    let tuples = state.picker.choose(body.len() as u64, durability_level)?;
    let primary = tuples.first().ok_or(AppError::NotEnoughSpace)?;

    let mut sharks = Vec::new();
    let mut content_md5 = String::new();
    for shark_ref in primary {
        let result = state.shark.put_object(shark_ref, &key, body.clone(), content_type.as_deref()).await?;
        content_md5 = result.content_md5;
        sharks.push(shark_ref.clone());
    }

    let durable_headers = ObjectMetadata::durable_headers(&header_map_to_strings(&headers));

    let metadata = ObjectMetadata {
        key: key.clone(),
        object_type: ObjectType::Object,
        owner_uuid: ctx
            .auth
            .owner
            .as_ref()
            .map(|a| a.uuid)
            .unwrap_or_else(Uuid::nil),
        etag: Uuid::new_v4().to_string(),
        content_md5,
        content_length: body.len() as u64,
        content_type,
        headers: durable_headers,
        roles: ctx.auth.conditions.active_roles.clone(),
        modified: Utc::now().timestamp_millis(),
        sharks,
    };

    state.metadata.put_object(&key, metadata.clone()).await?;

    Ok((
        StatusCode::NO_CONTENT,
        [
            ("etag", metadata.etag.clone()),
            ("computed-md5", metadata.content_md5.clone()),
        ],
    ))
}

pub async fn get_or_head_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
) -> AppResult<impl IntoResponse> {
    let key = format!("/{path}");
    let metadata = state.metadata.get_object(&key).await?;
    finalize_auth_context(&ctx, metadata.roles.clone())?;

    let shark = metadata.sharks.first().ok_or(AppError::ResourceNotFound)?;
    let bytes = state.shark.get_object(shark, &key).await?;

    Ok((
        StatusCode::OK,
        [
            ("etag", metadata.etag.clone()),
            ("content-md5", metadata.content_md5.clone()),
        ],
        bytes,
    ))
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
) -> AppResult<impl IntoResponse> {
    let key = format!("/{path}");
    let metadata = state.metadata.get_object(&key).await?;
    finalize_auth_context(&ctx, metadata.roles.clone())?;

    for shark in &metadata.sharks {
        state.shark.delete_object(shark, &key).await?;
    }
    state.metadata.delete_object(&key).await?;

    Ok(StatusCode::NO_CONTENT)
}

fn header_map_to_strings(headers: &HeaderMap) -> std::collections::HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}
