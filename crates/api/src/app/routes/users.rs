use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, patch, post},
};
use chrono::Utc;

use ferrobank_auth::{NewSession, NewUser, PasswordError, Role, UpdateUser, check_password, hash_password};
use ferrobank_core::Violations;
use ferrobank_core::validation::{validate_email, validate_full_name, validate_password, validate_username};
use ferrobank_infra::store::StoreError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

/// Unauthenticated user routes: sign-up and login.
pub fn public_router() -> Router {
    Router::new()
        .route("/", post(create_user))
        .route("/login", post(login_user))
}

pub fn router() -> Router {
    Router::new()
        .route("/me", get(current_user))
        .route("/:username", patch(update_user))
}

pub async fn create_user(
    Extension(services): Extension<AppServices>,
    Json(body): Json<dto::CreateUserRequest>,
) -> axum::response::Response {
    let mut violations = Violations::new();
    violations.check("username", validate_username(&body.username));
    violations.check("password", validate_password(&body.password));
    violations.check("full_name", validate_full_name(&body.full_name));
    violations.check("email", validate_email(&body.email));
    if let Err(v) = violations.into_result() {
        return errors::violations_to_response(v);
    }

    let hashed_password = match hash(body.password).await {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let new = NewUser {
        username: body.username,
        role: Role::Depositor,
        hashed_password,
        full_name: body.full_name,
        email: body.email,
    };

    match services.users.create_user(&new).await {
        Ok(user) => {
            tracing::info!(username = %user.username, "user created");
            (StatusCode::CREATED, Json(user)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn login_user(
    Extension(services): Extension<AppServices>,
    headers: HeaderMap,
    Json(body): Json<dto::LoginUserRequest>,
) -> axum::response::Response {
    let mut violations = Violations::new();
    violations.check("username", validate_username(&body.username));
    violations.check("password", validate_password(&body.password));
    if let Err(v) = violations.into_result() {
        return errors::violations_to_response(v);
    }

    let user = match services.users.get_user(&body.username).await {
        Ok(u) => u,
        Err(e) => return errors::store_error_to_response(e),
    };

    let hashed = user.hashed_password.clone();
    let checked = tokio::task::spawn_blocking(move || check_password(&body.password, &hashed)).await;
    match checked {
        Ok(Ok(())) => {}
        Ok(Err(PasswordError::Mismatch)) => {
            return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "incorrect password");
        }
        Ok(Err(e)) => return errors::internal("password check failed", e),
        Err(e) => return errors::internal("password check task failed", e),
    }

    let now = Utc::now();
    let (access_token, access_claims) =
        match services.tokens.create_token(&user.username, user.role, services.lifetimes.access, now) {
            Ok(t) => t,
            Err(e) => return errors::internal("failed to create access token", e),
        };
    let (refresh_token, refresh_claims) =
        match services.tokens.create_token(&user.username, user.role, services.lifetimes.refresh, now) {
            Ok(t) => t,
            Err(e) => return errors::internal("failed to create refresh token", e),
        };

    let new_session = NewSession::for_refresh_token(
        &refresh_claims,
        refresh_token.clone(),
        header_value(&headers, header::USER_AGENT.as_str()),
        header_value(&headers, "x-forwarded-for"),
    );
    let session = match services.sessions.create_session(&new_session).await {
        Ok(s) => s,
        Err(e) => return errors::store_error_to_response(e),
    };

    tracing::info!(username = %user.username, session_id = %session.id, "user logged in");
    Json(dto::LoginUserResponse {
        session_id: session.id,
        access_token,
        access_token_expires_at: access_claims.expires_at,
        refresh_token,
        refresh_token_expires_at: refresh_claims.expires_at,
        user,
    })
    .into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn current_user(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.users.get_user(principal.username()).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn update_user(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(username): Path<String>,
    Json(body): Json<dto::UpdateUserRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_owner_or_banker(&principal, &username, "user") {
        return resp;
    }

    let mut violations = Violations::new();
    if let Some(password) = &body.password {
        violations.check("password", validate_password(password));
    }
    if let Some(full_name) = &body.full_name {
        violations.check("full_name", validate_full_name(full_name));
    }
    if let Some(email) = &body.email {
        violations.check("email", validate_email(email));
    }
    if let Err(v) = violations.into_result() {
        return errors::violations_to_response(v);
    }

    let hashed_password = match body.password {
        Some(password) => match hash(password).await {
            Ok(h) => Some(h),
            Err(resp) => return resp,
        },
        None => None,
    };

    let update = UpdateUser {
        username,
        hashed_password,
        full_name: body.full_name,
        email: body.email,
    };

    match services.users.update_user(&update).await {
        Ok(user) => Json(user).into_response(),
        Err(StoreError::NotFound(_)) => {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("user {} not found", update.username))
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Argon2 is CPU-bound; keep it off the async workers.
async fn hash(password: String) -> Result<String, axum::response::Response> {
    match tokio::task::spawn_blocking(move || hash_password(&password)).await {
        Ok(Ok(h)) => Ok(h),
        Ok(Err(e)) => Err(errors::internal("failed to hash password", e)),
        Err(e) => Err(errors::internal("password hashing task failed", e)),
    }
}
