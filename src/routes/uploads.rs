//! `/:account/uploads/...` — multipart-upload create, part-upload, state,
//! commit, and abort handlers, plus the namespace verb restrictions that
//! keep ordinary object verbs off the upload-record resources themselves.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::pipeline::finalize_auth_context;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedRequest;
use crate::model::ObjectType;
use crate::mpu::{self, CreateRequest, PartInfo};
use crate::state::AppState;

/// Rejects object paths whose parent directory doesn't exist, per spec
/// §4.6: `/:account/stor`, `/public`, `/jobs`, and `/reports` are implicit
/// and never checked against the metadata store.
async fn ensure_parent_directory_exists(state: &AppState, object_path: &str) -> AppResult<()> {
    let parent = mpu::parent_directory(object_path);
    if mpu::is_implicit_top_level_directory(&parent) {
        return Ok(());
    }
    match state.metadata.get_object(&parent).await {
        Ok(dir) if dir.object_type == ObjectType::Directory => Ok(()),
        Ok(_) => Err(AppError::ParentNotDirectory),
        Err(AppError::ResourceNotFound) => Err(AppError::DirectoryDoesNotExist),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUploadRequest {
    pub object_path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(rename = "content-md5", default)]
    pub content_md5: Option<String>,
    #[serde(rename = "durability-level", default)]
    pub durability_level: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateUploadResponse {
    pub id: Uuid,
    #[serde(rename = "partsDirectory")]
    pub parts_directory: String,
}

pub async fn create_upload(
    State(state): State<AppState>,
    Path(account): Path<String>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
    Json(body): Json<CreateUploadRequest>,
) -> AppResult<impl IntoResponse> {
    finalize_auth_context(&ctx, vec![])?;

    let object_account = body
        .object_path
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|login| !login.is_empty())
        .ok_or(AppError::InvalidResource)?;
    state.identity.lookup_account(object_account).await?;

    let durability_level = body
        .durability_level
        .unwrap_or(state.config.mpu_min_copies.max(2));

    let request = CreateRequest {
        object_path: body.object_path,
        headers: body.headers,
        content_length: body.content_length,
        content_md5: body.content_md5,
        durability_level,
        content_disposition: None,
        min_copies: state.config.mpu_min_copies,
        max_copies: state.config.mpu_max_copies,
    };

    let upload = mpu::create(&request)?;
    state.metadata.put_upload(&upload).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateUploadResponse {
            id: upload.id,
            parts_directory: upload.parts_directory(&account),
        }),
    ))
}

pub async fn redirect_to_parts_directory(
    State(state): State<AppState>,
    Path((account, id)): Path<(String, Uuid)>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
) -> AppResult<impl IntoResponse> {
    finalize_auth_context(&ctx, vec![])?;
    let upload = state.metadata.get_upload(id).await?;
    Ok(Redirect::temporary(&upload.parts_directory(&account)))
}

pub async fn get_upload_state(
    State(state): State<AppState>,
    Path((_account, _prefix, id)): Path<(String, String, Uuid)>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
) -> AppResult<impl IntoResponse> {
    finalize_auth_context(&ctx, vec![])?;
    let upload = state.metadata.get_upload(id).await?;
    Ok(Json(upload))
}

pub async fn upload_part(
    State(state): State<AppState>,
    Path((account, _prefix, id, part_num)): Path<(String, String, Uuid, u32)>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    finalize_auth_context(&ctx, vec![])?;
    mpu::validate_part_num(part_num)?;

    let upload = state.metadata.get_upload(id).await?;
    if upload.state != mpu::UploadState::Created {
        return Err(AppError::InvalidMultipartUploadState);
    }

    let tuples = state.picker.choose(body.len() as u64, upload.num_copies)?;
    let primary = tuples.first().ok_or(AppError::NotEnoughSpace)?;

    let part_key = format!("{}/{part_num}", upload.parts_directory(&account));
    let size = body.len() as u64;
    let mut content_md5 = String::new();
    for shark_ref in primary {
        let result = state.shark.put_object(shark_ref, &part_key, body.clone(), None).await?;
        content_md5 = result.content_md5;
    }

    let mut upload = upload;
    upload.parts.insert(
        content_md5.clone(),
        PartInfo {
            etag: content_md5.clone(),
            size,
        },
    );
    state.metadata.put_upload(&upload).await?;

    Ok((StatusCode::NO_CONTENT, [("etag", content_md5)]))
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    #[serde(default)]
    pub parts: Vec<String>,
}

pub async fn commit_upload(
    State(state): State<AppState>,
    Path((_account, _prefix, id)): Path<(String, String, Uuid)>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
    Json(body): Json<FinalizeRequest>,
) -> AppResult<impl IntoResponse> {
    finalize_auth_context(&ctx, vec![])?;
    let mut upload = state.metadata.get_upload(id).await?;

    ensure_parent_directory_exists(&state, &upload.target_object).await?;

    let known_parts = upload.parts.clone();
    let lookup = |etag: &str| -> Option<PartInfo> { known_parts.get(etag).cloned() };

    mpu::commit(&mut upload, &body.parts, lookup, state.config.mpu_min_part_size)?;
    state.metadata.put_upload(&upload).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn abort_upload(
    State(state): State<AppState>,
    Path((_account, _prefix, id)): Path<(String, String, Uuid)>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
) -> AppResult<impl IntoResponse> {
    finalize_auth_context(&ctx, vec![])?;
    let mut upload = state.metadata.get_upload(id).await?;

    mpu::abort(&mut upload)?;
    state.metadata.put_upload(&upload).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_upload(
    State(state): State<AppState>,
    Path((_account, id)): Path<(String, Uuid)>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
    Query(query): Query<AllowMpuDeletesQuery>,
) -> AppResult<impl IntoResponse> {
    let caller = ctx.auth.caller.as_ref().ok_or(AppError::AuthorizationRequired)?;
    mpu::check_namespace_verb(
        &format!("/uploads/{id}"),
        "DELETE",
        caller.is_operator(),
        query.allow_mpu_deletes.as_deref(),
    )?;
    finalize_auth_context(&ctx, vec![])?;

    let mut upload = state.metadata.get_upload(id).await?;
    mpu::abort(&mut upload)?;
    state.metadata.put_upload(&upload).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AllowMpuDeletesQuery {
    #[serde(rename = "allowMpuDeletes", default)]
    pub allow_mpu_deletes: Option<String>,
}
