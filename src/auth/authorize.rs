//! Authorization evaluator: given a caller, the action they're attempting,
//! and the resource's role tags, decides allow/deny. Pure function over
//! the in-memory model — no I/O, so it's cheap to unit-test exhaustively.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::AppError;
use crate::model::{AuthContext, Caller};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Allowed,
    Denied(DenialReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    AccountBlocked,
    NoMatchingRoleTag,
    InvalidRole(Uuid),
    CrossAccount,
    RulesEvaluationFailed,
}

impl From<DenialReason> for AppError {
    fn from(reason: DenialReason) -> Self {
        match reason {
            DenialReason::AccountBlocked => AppError::AccountBlocked,
            DenialReason::NoMatchingRoleTag => AppError::NoMatchingRoleTag,
            DenialReason::InvalidRole(uuid) => AppError::InvalidRole(uuid.to_string()),
            DenialReason::CrossAccount => AppError::AuthorizationFailed,
            DenialReason::RulesEvaluationFailed => AppError::InternalError,
        }
    }
}

/// The owning account must be approved for provisioning and not blocked;
/// the caller's account must match the resource owner's account (Manta has
/// no cross-account object access); every active role the caller is
/// presenting must both be one the caller actually holds and tag the
/// resource; operators bypass role-tag matching entirely.
pub fn authorize(ctx: &AuthContext) -> AuthorizationOutcome {
    let Caller { account, .. } = &ctx.principal;

    let Some(account) = account else {
        return AuthorizationOutcome::Denied(DenialReason::RulesEvaluationFailed);
    };

    if !account.approved_for_provisioning {
        return AuthorizationOutcome::Denied(DenialReason::AccountBlocked);
    }

    if account.uuid != ctx.resource.owner.uuid {
        return AuthorizationOutcome::Denied(DenialReason::CrossAccount);
    }

    if ctx.principal.is_operator() {
        return AuthorizationOutcome::Allowed;
    }

    if ctx.principal.user.is_none() {
        // The account owner acting directly (no subuser) needs no role
        // tags at all; role-tag matching only constrains subusers.
        return AuthorizationOutcome::Allowed;
    }

    let active_roles: HashSet<Uuid> = if ctx.conditions.active_roles.is_empty() {
        ctx.principal.default_roles()
    } else {
        ctx.conditions.active_roles.iter().copied().collect()
    };

    let granted = ctx.principal.granted_roles();
    for role in &active_roles {
        if !granted.contains(role) {
            return AuthorizationOutcome::Denied(DenialReason::InvalidRole(*role));
        }
    }

    if ctx.resource.roles.is_empty() {
        // Unroled resources are owner-only; a subuser needs at least one
        // matching role tag to act on them.
        return AuthorizationOutcome::Denied(DenialReason::NoMatchingRoleTag);
    }

    let resource_roles: HashSet<Uuid> = ctx.resource.roles.iter().copied().collect();
    if active_roles.intersection(&resource_roles).next().is_none() {
        return AuthorizationOutcome::Denied(DenialReason::NoMatchingRoleTag);
    }

    AuthorizationOutcome::Allowed
}
