//! Wires the auth pipeline into axum's extractor model: pulling an
//! `AuthenticatedRequest` out of a request runs every stage in
//! `auth::pipeline::build_pipeline` before the handler body ever executes,
//! the same way the teacher's `AuthenticatedUser` extractor ran JWT
//! verification ahead of the handler.

use std::collections::BTreeMap;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::async_trait;
use uuid::Uuid;

use crate::auth::pipeline::{build_pipeline, AuthWorkingState};
use crate::error::AppError;
use crate::middleware::chain::ChainEnd;
use crate::middleware::request_context::RequestContext;
use crate::state::AppState;

pub struct AuthenticatedRequest(pub RequestContext);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedRequest {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let query: BTreeMap<String, String> = parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        let mut ctx = RequestContext {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            path_pre_sanitize: parts.uri.path().to_string(),
            headers: parts.headers.clone(),
            query,
            request_id: Uuid::new_v4(),
            identity: state.identity.clone(),
            metadata: state.metadata.clone(),
            picker: state.picker.clone(),
            token_sealer: state.token_sealer.clone(),
            auth: AuthWorkingState::default(),
            auth_context: None,
        };

        match build_pipeline().run(&mut ctx).await {
            Ok(()) => Ok(AuthenticatedRequest(ctx)),
            Err(ChainEnd::Failed(err)) => Err(err),
            Err(ChainEnd::Stopped(_)) => Err(AppError::internal("auth pipeline stopped unexpectedly")),
        }
    }
}

