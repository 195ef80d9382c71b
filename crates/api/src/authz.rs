//! API-side authorization guards.
//!
//! Policy lives in `ferrobank-auth`; these helpers only turn a denial into an
//! HTTP response so handlers can `return` early.

use axum::http::StatusCode;
use axum::response::Response;

use ferrobank_auth::{AuthzError, Role, authorize, ensure_owner, ensure_owner_or_banker};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

pub const DEPOSITOR_OR_BANKER: &[Role] = &[Role::Depositor, Role::Banker];

pub fn require_role(principal: &PrincipalContext, accessible: &[Role]) -> Result<(), Response> {
    authorize(principal.principal(), accessible).map_err(forbidden)
}

pub fn require_owner(principal: &PrincipalContext, owner: &str, what: &str) -> Result<(), Response> {
    ensure_owner(principal.principal(), owner, what).map_err(forbidden)
}

pub fn require_owner_or_banker(principal: &PrincipalContext, owner: &str, what: &str) -> Result<(), Response> {
    ensure_owner_or_banker(principal.principal(), owner, what).map_err(forbidden)
}

/// Whose records a listing covers: bankers may name any user, everyone
/// else only themselves.
pub fn listing_owner(principal: &PrincipalContext, requested: Option<String>) -> Result<String, Response> {
    match requested {
        None => Ok(principal.username().to_string()),
        Some(username) if username == principal.username() => Ok(username),
        Some(username) if principal.role().is_banker() => Ok(username),
        Some(_) => Err(json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "only bankers may list another user's records",
        )),
    }
}

fn forbidden(err: AuthzError) -> Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}
