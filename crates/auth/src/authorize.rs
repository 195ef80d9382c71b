use serde::Serialize;
use thiserror::Error;

use crate::{Role, TokenClaims};

/// Authenticated caller, as resolved from a verified token.
///
/// Construction is decoupled from storage and transport: the API derives it
/// from token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub username: String,
    pub role: Role,
}

impl From<&TokenClaims> for Principal {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            username: claims.username.clone(),
            role: claims.role,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role '{0}' may not perform this operation")]
    RoleNotAllowed(Role),

    #[error("forbidden: {0}")]
    NotOwner(String),
}

/// Allow the call only when the principal's role is in `accessible`.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, accessible: &[Role]) -> Result<(), AuthzError> {
    if accessible.contains(&principal.role) {
        Ok(())
    } else {
        Err(AuthzError::RoleNotAllowed(principal.role))
    }
}

/// Resource owned by `owner` may be touched by its owner or by any banker.
pub fn ensure_owner_or_banker(principal: &Principal, owner: &str, what: &str) -> Result<(), AuthzError> {
    if principal.username == owner || principal.role.is_banker() {
        Ok(())
    } else {
        Err(AuthzError::NotOwner(format!("{what} belongs to another user")))
    }
}

/// Resource owned by `owner` may only be touched by its owner.
pub fn ensure_owner(principal: &Principal, owner: &str, what: &str) -> Result<(), AuthzError> {
    if principal.username == owner {
        Ok(())
    } else {
        Err(AuthzError::NotOwner(format!("{what} does not belong to the authenticated user")))
    }
}
