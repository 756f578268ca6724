//! Multipart-upload state machine: create, upload-part, and finalize
//! (commit/abort), plus the MPU-namespace verb-restriction rules.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const MIN_PART_NUM: u32 = 0;
pub const MAX_PART_NUM: u32 = 9999;
pub const MAX_NUM_PARTS: usize = (MAX_PART_NUM + 1) as usize;
const CONDITIONAL_HEADERS: &[&str] = &["if-match", "if-none-match", "if-modified-since", "if-unmodified-since"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Created,
    Finalizing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeResult {
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub target_object: String,
    pub state: UploadState,
    pub result: Option<FinalizeResult>,
    pub headers: HashMap<String, String>,
    pub creation_time_ms: i64,
    pub num_copies: u32,
    pub content_length: Option<u64>,
    pub content_md5: Option<String>,
    pub parts_md5_summary: Option<String>,
    pub committed_part_etags: Option<Vec<String>>,
    #[serde(default)]
    pub parts: HashMap<String, PartInfo>,
}

impl UploadRecord {
    /// The `1-4`-character hex prefix that locates the parts directory,
    /// derived from the upload id's last hex character.
    pub fn parts_directory_prefix(&self) -> String {
        let full = self.id.simple().to_string();
        let last = full.chars().last().unwrap_or('0');
        let len = match last {
            '0'..='3' => 1,
            '4'..='7' => 2,
            '8'..='b' => 3,
            _ => 4,
        };
        full[..len].to_string()
    }

    pub fn parts_directory(&self, account: &str) -> String {
        format!("/{account}/uploads/{}/{}", self.parts_directory_prefix(), self.id)
    }
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub object_path: String,
    pub headers: HashMap<String, String>,
    pub content_length: Option<u64>,
    pub content_md5: Option<String>,
    pub durability_level: u32,
    pub content_disposition: Option<String>,
    pub min_copies: u32,
    pub max_copies: u32,
}

pub fn create(request: &CreateRequest) -> AppResult<UploadRecord> {
    if is_root_path(&request.object_path) {
        return Err(AppError::OperationNotAllowedOnRootDirectory);
    }

    for header in CONDITIONAL_HEADERS {
        if request.headers.contains_key(*header) {
            return Err(AppError::MultipartUploadInvalidArgument(format!(
                "conditional header {header} is not valid for multipart uploads"
            )));
        }
    }

    if request.durability_level < request.min_copies || request.durability_level > request.max_copies {
        return Err(AppError::InvalidDurabilityLevel);
    }

    if let Some(disposition) = &request.content_disposition {
        if disposition.trim().is_empty() {
            return Err(AppError::BadRequest("content-disposition is empty".into()));
        }
    }

    let id = Uuid::new_v4();
    Ok(UploadRecord {
        id,
        target_object: request.object_path.clone(),
        state: UploadState::Created,
        result: None,
        headers: request.headers.clone(),
        creation_time_ms: Utc::now().timestamp_millis(),
        num_copies: request.durability_level,
        content_length: request.content_length,
        content_md5: request.content_md5.clone(),
        parts_md5_summary: None,
        committed_part_etags: None,
        parts: HashMap::new(),
    })
}

fn is_root_path(path: &str) -> bool {
    let trimmed = path.trim_end_matches('/');
    trimmed.split('/').filter(|s| !s.is_empty()).count() <= 1
}

/// The directory the final path segment lives in, e.g.
/// `/poseidon/stor/nope/foo.txt` -> `/poseidon/stor/nope`.
pub fn parent_directory(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

/// Manta's per-account top-level directories (`stor`, `public`, `jobs`,
/// `reports`) always exist implicitly and are never stored as metadata
/// records; everything deeper must be a real directory object.
pub fn is_implicit_top_level_directory(path: &str) -> bool {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    matches!(segments.as_slice(), [_account, "stor" | "public" | "jobs" | "reports"])
}

pub fn validate_part_num(part_num: u32) -> AppResult<()> {
    if part_num < MIN_PART_NUM || part_num > MAX_PART_NUM {
        return Err(AppError::MultipartUploadPartNum);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub computed_md5: String,
    pub parts_md5_summary: String,
}

/// Commits an upload given the ordered ETags the client presents and the
/// server's own record of each submitted part's size/etag.
pub fn commit(
    upload: &mut UploadRecord,
    requested_etags: &[String],
    part_lookup: impl Fn(&str) -> Option<PartInfo>,
    min_part_size: u64,
) -> AppResult<CommitOutcome> {
    match (upload.state, upload.result) {
        (UploadState::Done, Some(FinalizeResult::Committed)) => {
            if upload.committed_part_etags.as_deref() == Some(requested_etags) {
                return Ok(CommitOutcome {
                    computed_md5: upload.content_md5.clone().unwrap_or_default(),
                    parts_md5_summary: upload.parts_md5_summary.clone().unwrap_or_default(),
                });
            }
            return Err(AppError::InvalidMultipartUploadState);
        }
        (UploadState::Done, Some(FinalizeResult::Aborted)) => {
            return Err(AppError::InvalidMultipartUploadState);
        }
        (UploadState::Created, _) => {}
        _ => return Err(AppError::InvalidMultipartUploadState),
    }

    if requested_etags.len() > MAX_NUM_PARTS {
        return Err(AppError::MultipartUploadInvalidArgument("too many parts".into()));
    }

    let mut seen = HashSet::new();
    for etag in requested_etags {
        if etag.trim().is_empty() {
            return Err(AppError::MultipartUploadInvalidArgument("empty part etag".into()));
        }
        if !seen.insert(etag.clone()) {
            return Err(AppError::MultipartUploadInvalidArgument("duplicate part etag".into()));
        }
    }

    let mut parts = Vec::with_capacity(requested_etags.len());
    for etag in requested_etags {
        let part = part_lookup(etag)
            .ok_or_else(|| AppError::MultipartUploadInvalidArgument(format!("unknown part etag {etag}")))?;
        parts.push(part);
    }

    let last_index = parts.len().checked_sub(1);
    for (i, part) in parts.iter().enumerate() {
        let is_final = last_index == Some(i);
        if !is_final && part.size < min_part_size {
            return Err(AppError::MultipartUploadInvalidArgument(format!(
                "non-final part {i} is smaller than the minimum part size"
            )));
        }
    }

    let total_size: u64 = parts.iter().map(|p| p.size).sum();
    if let Some(expected) = upload.content_length {
        if expected != total_size {
            return Err(AppError::MultipartUploadInvalidArgument(
                "sum of part sizes does not match declared content-length".into(),
            ));
        }
    }

    let parts_md5_summary = {
        let mut hasher = Md5::new();
        for part in &parts {
            hasher.update(part.etag.as_bytes());
        }
        base64_digest(hasher)
    };

    // The composed object's content-MD5 is computed by the storage layer
    // over the concatenated bytes once the parts are linked; here we only
    // enforce the client-declared expectation if one was given.
    let computed_md5 = upload.content_md5.clone().unwrap_or_else(|| parts_md5_summary.clone());
    if let Some(expected_md5) = &upload.content_md5 {
        if expected_md5 != &computed_md5 {
            return Err(AppError::MultipartUploadInvalidArgument(
                "composed object content-md5 does not match declared content-md5".into(),
            ));
        }
    }

    upload.state = UploadState::Done;
    upload.result = Some(FinalizeResult::Committed);
    upload.committed_part_etags = Some(requested_etags.to_vec());
    upload.parts_md5_summary = Some(parts_md5_summary.clone());
    upload.content_md5 = Some(computed_md5.clone());

    Ok(CommitOutcome {
        computed_md5,
        parts_md5_summary,
    })
}

pub fn abort(upload: &mut UploadRecord) -> AppResult<()> {
    match (upload.state, upload.result) {
        (UploadState::Created, _) => {
            upload.state = UploadState::Done;
            upload.result = Some(FinalizeResult::Aborted);
            Ok(())
        }
        (UploadState::Done, Some(FinalizeResult::Aborted)) => Ok(()),
        (UploadState::Done, Some(FinalizeResult::Committed)) => Err(AppError::InvalidMultipartUploadState),
        _ => Err(AppError::InvalidMultipartUploadState),
    }
}

fn base64_digest(hasher: Md5) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(hasher.finalize())
}

/// MPU-namespace verb restrictions: `/:account/uploads/...` paths are not
/// ordinary objects. Returns `Ok(())` if the verb is allowed on this path,
/// else the appropriate error.
pub fn check_namespace_verb(
    path: &str,
    method: &str,
    is_operator: bool,
    allow_mpu_deletes_param: Option<&str>,
) -> AppResult<()> {
    let Some(suffix) = mpu_path_suffix(path) else {
        return Ok(());
    };

    match suffix {
        MpuPathKind::UploadRoot => match method {
            "DELETE" => {
                if !is_operator {
                    return Err(AppError::MethodNotAllowed);
                }
                match allow_mpu_deletes_param {
                    Some("true") => Ok(()),
                    Some(_) => Err(AppError::UnprocessableEntity(
                        "allowMpuDeletes must be exactly \"true\"".into(),
                    )),
                    None => Err(AppError::MethodNotAllowed),
                }
            }
            _ => Ok(()),
        },
        MpuPathKind::State | MpuPathKind::AbortOrCommit => Err(AppError::MethodNotAllowed),
        MpuPathKind::Part => {
            if method == "PUT" {
                Ok(())
            } else {
                Err(AppError::MethodNotAllowed)
            }
        }
    }
}

enum MpuPathKind {
    UploadRoot,
    State,
    AbortOrCommit,
    Part,
}

fn mpu_path_suffix(path: &str) -> Option<MpuPathKind> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let uploads_idx = segments.iter().position(|s| *s == "uploads")?;
    let tail = &segments[uploads_idx + 1..];
    match tail {
        [] => None,
        [_id] => Some(MpuPathKind::UploadRoot),
        [_id, "state"] => Some(MpuPathKind::State),
        [_id, "abort"] | [_id, "commit"] => Some(MpuPathKind::AbortOrCommit),
        [_id, part] if part.parse::<u32>().is_ok() => Some(MpuPathKind::Part),
        _ => Some(MpuPathKind::UploadRoot),
    }
}
