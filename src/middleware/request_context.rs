//! Per-request shared context threaded through the chain runtime. Mirrors
//! the minimum field set spec'd for the handler chain: method, both the
//! canonicalized and pre-sanitize path, headers, query, a request id, and
//! handles to the collaborators every auth-pipeline stage needs.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use uuid::Uuid;

use crate::auth::identity::IdentityClient;
use crate::auth::pipeline::AuthWorkingState;
use crate::auth::token::TokenSealer;
use crate::metadata::MetadataClient;
use crate::model::AuthContext;
use crate::picker::Picker;

pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub path_pre_sanitize: String,
    pub headers: HeaderMap,
    pub query: BTreeMap<String, String>,
    pub request_id: Uuid,

    pub identity: Arc<dyn IdentityClient>,
    pub metadata: Arc<dyn MetadataClient>,
    pub picker: Arc<Picker>,
    pub token_sealer: Arc<TokenSealer>,

    pub auth: AuthWorkingState,
    pub auth_context: Option<AuthContext>,
}

impl RequestContext {
    pub fn header_str(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}
