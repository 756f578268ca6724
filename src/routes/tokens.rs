//! `POST /:account/tokens` — mint a delegation token for the authenticated
//! caller, sealing whatever conditions the current request resolved.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::pipeline::finalize_auth_context;
use crate::auth::token::{Principal, PrincipalRef, TokenPayloadV2};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MintTokenRequest {
    #[serde(default)]
    pub user: Option<uuid::Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MintTokenResponse {
    pub token: String,
}

pub async fn mint_token(
    State(state): State<AppState>,
    Path(_account): Path<String>,
    AuthenticatedRequest(ctx): AuthenticatedRequest,
    Json(request): Json<MintTokenRequest>,
) -> AppResult<(StatusCode, Json<MintTokenResponse>)> {
    finalize_auth_context(&ctx, vec![])?;

    let caller = ctx.auth.caller.as_ref().ok_or(AppError::AuthorizationRequired)?;
    let account = caller.account.as_ref().ok_or(AppError::AuthorizationRequired)?;

    let principal = Principal {
        account: PrincipalRef { uuid: account.uuid },
        user: request.user.map(|uuid| PrincipalRef { uuid }),
        roles: ctx.auth.conditions.active_roles.clone(),
    };

    let devkey_id = ctx.auth.parsed_signature.as_ref().map(|sig| sig.key_id.clone());
    let payload = TokenPayloadV2::new(now_ms(), principal, &ctx.auth.conditions, devkey_id);
    let token = state.token_sealer.seal(&payload)?;

    Ok((StatusCode::CREATED, Json(MintTokenResponse { token })))
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
