//! The twelve-stage authentication pipeline (spec §4.3), run as a `Chain`
//! of `Handler`s over a shared `AuthWorkingState`. Each stage either moves
//! to the next or short-circuits with an error; none of them touch the
//! response body directly, so every `HandlerOutcome` here is `Next` or
//! `Fail`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::authorize::{authorize, AuthorizationOutcome};
use crate::auth::signature::{self, KeyId, ParsedSignature, PresignedParams};
use crate::error::AppError;
use crate::middleware::chain::{Chain, Handler, HandlerOutcome};
use crate::middleware::request_context::RequestContext;
use crate::model::{Account, AuthContext, Caller, Conditions, ResourceContext};

const PUBLIC_ACCESS_SEGMENT: &str = "public";

/// The mutable scratch space the twelve stages thread through. Lives on
/// `RequestContext` for the duration of one request.
#[derive(Default)]
pub struct AuthWorkingState {
    pub presigned: bool,
    pub presigned_params: Option<PresignedParams>,
    pub header_scheme: Option<String>,
    pub token_payload: Option<crate::auth::token::UnsealedToken>,
    pub parsed_signature: Option<ParsedSignature>,
    pub key_id: Option<KeyId>,
    pub caller: Option<Caller>,
    pub anonymous: bool,
    pub conditions: Conditions,
    pub delegated_account_override: Option<Uuid>,
    pub owner: Option<Account>,
}

pub fn build_pipeline() -> Chain {
    Chain::new(vec![
        Box::new(Init),
        Box::new(DetectPresigned),
        Box::new(PresignedParse),
        Box::new(SchemeCheck),
        Box::new(TokenParse),
        Box::new(SignatureParse),
        Box::new(KeyIdParse),
        Box::new(LoadCaller),
        Box::new(VerifySignature),
        Box::new(DelegatedTokenHeader),
        Box::new(LoadOwner),
        Box::new(ActiveRoles),
    ])
}

struct Init;
#[async_trait]
impl Handler for Init {
    fn name(&self) -> &'static str {
        "init"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        ctx.auth = AuthWorkingState::default();
        HandlerOutcome::Next
    }
}

struct DetectPresigned;
#[async_trait]
impl Handler for DetectPresigned {
    fn name(&self) -> &'static str {
        "detect-presigned"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        let has_auth_header = ctx.header_str("authorization").is_some();
        let has_query_params = ["expires", "signature", "keyId", "algorithm"]
            .iter()
            .any(|p| ctx.query.contains_key(*p));
        ctx.auth.presigned = !has_auth_header && has_query_params;
        HandlerOutcome::Next
    }
}

struct PresignedParse;
#[async_trait]
impl Handler for PresignedParse {
    fn name(&self) -> &'static str {
        "presigned-parse"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        if !ctx.auth.presigned {
            return HandlerOutcome::Next;
        }
        let query: BTreeMap<String, String> = ctx.query.clone();
        match signature::parse_presigned_params(&query) {
            Ok(params) => {
                let now = Utc::now().timestamp();
                if params.expires < now {
                    return HandlerOutcome::Fail(AppError::InvalidQueryStringAuthentication);
                }
                ctx.auth.presigned_params = Some(params);
                HandlerOutcome::Next
            }
            Err(err) => HandlerOutcome::Fail(err),
        }
    }
}

struct SchemeCheck;
#[async_trait]
impl Handler for SchemeCheck {
    fn name(&self) -> &'static str {
        "scheme-check"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        if ctx.auth.presigned {
            return HandlerOutcome::Next;
        }
        let Some(header) = ctx.header_str("authorization") else {
            return HandlerOutcome::Next;
        };
        let scheme = header.split_whitespace().next().unwrap_or_default().to_lowercase();
        if scheme != "signature" && scheme != "token" {
            return HandlerOutcome::Fail(AppError::AuthorizationSchemeNotAllowed);
        }
        ctx.auth.header_scheme = Some(scheme);
        HandlerOutcome::Next
    }
}

struct TokenParse;
#[async_trait]
impl Handler for TokenParse {
    fn name(&self) -> &'static str {
        "token-parse"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        if ctx.auth.header_scheme.as_deref() != Some("token") {
            return HandlerOutcome::Next;
        }
        let header = ctx.header_str("authorization").unwrap_or_default();
        let raw_token = header.splitn(2, ' ').nth(1).unwrap_or_default();
        match ctx.token_sealer.unseal(raw_token) {
            Ok(unsealed) => {
                ctx.auth.token_payload = Some(unsealed);
                HandlerOutcome::Next
            }
            Err(err) => HandlerOutcome::Fail(err),
        }
    }
}

struct SignatureParse;
#[async_trait]
impl Handler for SignatureParse {
    fn name(&self) -> &'static str {
        "signature-parse"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        if ctx.auth.presigned {
            if let Some(params) = &ctx.auth.presigned_params {
                ctx.auth.parsed_signature = Some(ParsedSignature {
                    key_id: params.key_id.clone(),
                    algorithm: params.algorithm.clone(),
                    headers: vec![],
                    signature: params.signature.clone(),
                });
            }
            return HandlerOutcome::Next;
        }
        if ctx.auth.header_scheme.as_deref() != Some("signature") {
            return HandlerOutcome::Next;
        }
        let header = ctx.header_str("authorization").unwrap_or_default();
        match signature::parse_authorization_header(&header) {
            Ok(parsed) => {
                ctx.auth.parsed_signature = Some(parsed);
                HandlerOutcome::Next
            }
            Err(err) => HandlerOutcome::Fail(err),
        }
    }
}

struct KeyIdParse;
#[async_trait]
impl Handler for KeyIdParse {
    fn name(&self) -> &'static str {
        "key-id-parse"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        let Some(parsed) = &ctx.auth.parsed_signature else {
            return HandlerOutcome::Next;
        };
        match signature::parse_key_id(&parsed.key_id) {
            Ok(key_id) => {
                ctx.auth.key_id = Some(key_id);
                HandlerOutcome::Next
            }
            Err(err) => HandlerOutcome::Fail(err),
        }
    }
}

struct LoadCaller;
#[async_trait]
impl Handler for LoadCaller {
    fn name(&self) -> &'static str {
        "load-caller"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        let account_login = if let Some(token) = &ctx.auth.token_payload {
            Some(token.account_uuid().to_string())
        } else {
            ctx.auth.key_id.as_ref().map(|k| match k {
                KeyId::Account { account, .. } => account.clone(),
                KeyId::User { account, .. } => account.clone(),
            })
        };

        let user_login = ctx.auth.key_id.as_ref().and_then(|k| match k {
            KeyId::User { user, .. } => Some(user.clone()),
            KeyId::Account { .. } => None,
        });

        let Some(account_login) = account_login else {
            if is_public_access_path(&ctx.path) {
                ctx.auth.caller = None;
                ctx.auth.anonymous = false;
            } else {
                ctx.auth.anonymous = true;
            }
            return HandlerOutcome::Next;
        };

        let account = match ctx.identity.lookup_account(&account_login).await {
            Ok(account) => account,
            Err(err) => return HandlerOutcome::Fail(err),
        };

        if !account.is_operator_by_group() && !account.approved_for_provisioning {
            return HandlerOutcome::Fail(AppError::AccountBlocked);
        }

        let user = if let Some(user_login) = user_login {
            match ctx.identity.lookup_user(account.uuid, &user_login).await {
                Ok(user) => Some(user),
                Err(err) => return HandlerOutcome::Fail(err),
            }
        } else {
            None
        };

        ctx.auth.caller = Some(Caller {
            account: Some(account),
            user,
            roles: std::collections::HashMap::new(),
            anonymous: false,
        });
        HandlerOutcome::Next
    }
}

fn is_public_access_path(path: &str) -> bool {
    let segments: Vec<&str> = path.trim_start_matches('/').splitn(3, '/').collect();
    matches!(segments.as_slice(), [_account, second, ..] if *second == PUBLIC_ACCESS_SEGMENT)
}

struct VerifySignature;
#[async_trait]
impl Handler for VerifySignature {
    fn name(&self) -> &'static str {
        "verify-signature"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        let Some(parsed) = ctx.auth.parsed_signature.clone() else {
            return HandlerOutcome::Next;
        };
        let Some(key_id) = &ctx.auth.key_id else {
            return HandlerOutcome::Next;
        };
        let fingerprint = match key_id {
            KeyId::Account { fingerprint, .. } => fingerprint,
            KeyId::User { fingerprint, .. } => fingerprint,
        };

        let Some(caller) = &ctx.auth.caller else {
            return HandlerOutcome::Fail(AppError::AuthorizationFailed);
        };
        let Some(keys) = caller.keys() else {
            return HandlerOutcome::Fail(AppError::KeyDoesNotExist);
        };
        let Some(public_key_pem) = keys.get(fingerprint) else {
            return HandlerOutcome::Fail(AppError::KeyDoesNotExist);
        };

        let signing_string = if ctx.auth.presigned {
            signature::build_presigned_signing_string(
                &[ctx.method.as_str()],
                &ctx.header_str("host").unwrap_or_default(),
                &ctx.path_pre_sanitize,
                &ctx.query,
            )
        } else {
            signature::build_signing_string(&parsed.headers, ctx.method.as_str(), &ctx.path_pre_sanitize, |name| {
                ctx.header_str(name)
            })
        };

        match signature::verify(&parsed.algorithm, public_key_pem, &signing_string, &parsed.signature) {
            Ok(()) => HandlerOutcome::Next,
            Err(err) => HandlerOutcome::Fail(err),
        }
    }
}

struct DelegatedTokenHeader;
#[async_trait]
impl Handler for DelegatedTokenHeader {
    fn name(&self) -> &'static str {
        "delegated-token-header"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        let Some(raw) = ctx.header_str("x-auth-token") else {
            return HandlerOutcome::Next;
        };
        let unsealed = match ctx.token_sealer.unseal(&raw) {
            Ok(unsealed) => unsealed,
            Err(err) => return HandlerOutcome::Fail(err),
        };

        if let Some(signature_key_id) = ctx.auth.parsed_signature.as_ref().map(|sig| sig.key_id.as_str()) {
            if unsealed.devkey_id() != Some(signature_key_id) {
                return HandlerOutcome::Fail(AppError::InvalidHttpAuthenticationToken);
            }
        }

        ctx.auth.delegated_account_override = Some(unsealed.account_uuid());
        let account = match ctx.identity.lookup_account(&unsealed.account_uuid().to_string()).await {
            Ok(account) => account,
            Err(err) => return HandlerOutcome::Fail(err),
        };
        ctx.auth.caller = Some(Caller {
            account: Some(account),
            user: None,
            roles: std::collections::HashMap::new(),
            anonymous: false,
        });
        HandlerOutcome::Next
    }
}

struct LoadOwner;
#[async_trait]
impl Handler for LoadOwner {
    fn name(&self) -> &'static str {
        "load-owner"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        let Some(owner_login) = ctx.path.trim_start_matches('/').split('/').next().map(str::to_string) else {
            return HandlerOutcome::Fail(AppError::InvalidResource);
        };

        let owner = match ctx.identity.lookup_account(&owner_login).await {
            Ok(account) => account,
            Err(err) => return HandlerOutcome::Fail(err),
        };

        let is_operator = ctx.auth.caller.as_ref().map(|c| c.is_operator()).unwrap_or(false);

        if ctx.auth.caller.is_none() {
            return HandlerOutcome::Fail(AppError::AuthorizationFailed);
        }

        if !is_operator {
            if let Some(caller_account) = ctx.auth.caller.as_ref().and_then(|c| c.account.as_ref()) {
                if caller_account.uuid != owner.uuid && !owner.approved_for_provisioning {
                    return HandlerOutcome::Fail(AppError::AuthorizationFailed);
                }
            }
        }

        ctx.auth.owner = Some(owner);
        HandlerOutcome::Next
    }
}

struct ActiveRoles;
#[async_trait]
impl Handler for ActiveRoles {
    fn name(&self) -> &'static str {
        "active-roles"
    }
    async fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        let mut conditions = Conditions {
            method: Some(ctx.method.to_string()),
            date: Some(Utc::now().to_rfc2822()),
            day: Some(Utc::now().format("%A").to_string()),
            time: Some(Utc::now().format("%H:%M:%S").to_string()),
            sourceip: ctx
                .header_str("x-forwarded-for")
                .and_then(|v| v.split(',').next().map(str::trim).map(str::to_string)),
            user_agent: ctx.header_str("user-agent"),
            fromjob: false,
            ..Default::default()
        };

        if let Some(token) = &ctx.auth.token_payload {
            conditions = conditions.overlay(&token.conditions());
        } else {
            let requested = ctx
                .query
                .get("role")
                .cloned()
                .or_else(|| ctx.header_str("role"));

            if let Some(requested) = requested {
                let caller = ctx.auth.caller.as_ref();
                let granted = caller.map(|c| c.granted_roles()).unwrap_or_default();
                let roles = if requested == "*" {
                    granted.into_iter().collect()
                } else {
                    let mut resolved = Vec::new();
                    for _name in requested.split(',') {
                        // Role-name-to-uuid resolution is delegated to the
                        // identity service in the real pipeline; callers in
                        // this codebase pass uuids directly.
                        match Uuid::parse_str(_name.trim()) {
                            Ok(uuid) if granted.contains(&uuid) => resolved.push(uuid),
                            _ => return HandlerOutcome::Fail(AppError::InvalidRole(_name.to_string())),
                        }
                    }
                    resolved
                };
                conditions.active_roles = roles;
            } else {
                conditions.active_roles = ctx
                    .auth
                    .caller
                    .as_ref()
                    .map(|c| c.default_roles().into_iter().collect())
                    .unwrap_or_default();
            }
        }

        ctx.auth.conditions = conditions;
        HandlerOutcome::Next
    }
}

/// Assembles the final `AuthContext` and runs the authorization evaluator,
/// once the pipeline and the resource's metadata (role tags) are both
/// available. `resource_roles` is empty for account-scoped routes (e.g.
/// minting a token) that have no specific object to tag.
pub fn finalize_auth_context(ctx: &RequestContext, resource_roles: Vec<Uuid>) -> Result<AuthContext, AppError> {
    let owner = ctx.auth.owner.clone().ok_or(AppError::InvalidResource)?;
    let principal = ctx.auth.caller.clone().unwrap_or_else(Caller::anonymous);
    let auth_context = AuthContext {
        principal,
        action: ctx.method.to_string(),
        resource: ResourceContext {
            owner,
            key: ctx.path.clone(),
            roles: resource_roles,
        },
        conditions: ctx.auth.conditions.clone(),
    };

    match authorize(&auth_context) {
        AuthorizationOutcome::Allowed => Ok(auth_context),
        AuthorizationOutcome::Denied(reason) => Err(AppError::from(reason)),
    }
}
