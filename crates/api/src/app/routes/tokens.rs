use axum::{Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::post};
use chrono::Utc;

use ferrobank_infra::store::StoreError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Token renewal is reachable without an access token.
pub fn router() -> Router {
    Router::new().route("/renew_access", post(renew_access))
}

/// Trade a refresh token for a fresh access token.
///
/// The refresh token must verify and its session must be unblocked, owned by
/// the token's user, bound to this exact token and not yet expired.
pub async fn renew_access(
    Extension(services): Extension<AppServices>,
    Json(body): Json<dto::RenewAccessRequest>,
) -> axum::response::Response {
    let now = Utc::now();
    let claims = match services.tokens.verify_token(&body.refresh_token, now) {
        Ok(c) => c,
        Err(e) => return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", e.to_string()),
    };

    let session = match services.sessions.get_session(claims.id).await {
        Ok(s) => s,
        Err(StoreError::NotFound(_)) => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "session not found");
        }
        Err(e) => return errors::store_error_to_response(e),
    };

    if let Err(e) = session.check_renewal(&claims, &body.refresh_token, now) {
        tracing::warn!(session_id = %session.id, error = %e, "access renewal refused");
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let (access_token, access_claims) =
        match services
            .tokens
            .create_token(&claims.username, claims.role, services.lifetimes.access, now)
        {
            Ok(t) => t,
            Err(e) => return errors::internal("failed to create access token", e),
        };

    Json(dto::RenewAccessResponse {
        access_token,
        access_token_expires_at: access_claims.expires_at,
    })
    .into_response()
}
