use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use ferrobank_auth::Role;
use ferrobank_core::{AccountId, Currency};
use ferrobank_ledger::{Account, BalanceAdjustment, ListAccounts, NewAccount};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::{self, DEPOSITOR_OR_BANKER};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_account).get(list_accounts))
        .route("/:id", get(get_account).delete(delete_account))
        .route("/:id/adjustments", post(adjust_balance))
        .route("/:id/entries", get(list_entries))
}

pub async fn create_account(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateAccountRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_role(&principal, &[Role::Depositor]) {
        return resp;
    }

    let currency: Currency = match body.currency.parse() {
        Ok(c) => c,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let new = NewAccount {
        owner: principal.username().to_string(),
        currency,
    };

    match services.accounts.create_account(&new).await {
        Ok(account) => {
            tracing::info!(account_id = %account.id, owner = %account.owner, %currency, "account opened");
            (StatusCode::CREATED, Json(account)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_accounts(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_role(&principal, DEPOSITOR_OR_BANKER) {
        return resp;
    }
    let page = match query.page() {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let owner = match authz::listing_owner(&principal, query.username) {
        Ok(o) => o,
        Err(resp) => return resp,
    };

    let listing = ListAccounts {
        owner,
        limit: page.limit,
        offset: page.offset,
    };
    match services.accounts.list_accounts(&listing).await {
        Ok(items) => Json(dto::ListResponse { items }).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_account(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_role(&principal, DEPOSITOR_OR_BANKER) {
        return resp;
    }
    let account = match load_account(&services, id).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = authz::require_owner(&principal, &account.owner, "account") {
        return resp;
    }
    Json(account).into_response()
}

pub async fn delete_account(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    let account = match load_account(&services, id).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = authz::require_owner_or_banker(&principal, &account.owner, "account") {
        return resp;
    }

    match services.accounts.delete_account(account.id).await {
        Ok(()) => {
            tracing::info!(account_id = %account.id, by = %principal.username(), "account deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn adjust_balance(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<i64>,
    Json(body): Json<dto::AdjustBalanceRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_role(&principal, &[Role::Banker]) {
        return resp;
    }
    let account_id = match AccountId::parse_positive(id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let adjustment = BalanceAdjustment {
        account_id,
        amount: body.amount,
    };
    match services.engine.adjust_balance(&adjustment).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::transfer_error_to_response(e),
    }
}

pub async fn list_entries(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<i64>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let page = match query.page() {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let account = match load_account(&services, id).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    if let Err(resp) = authz::require_owner_or_banker(&principal, &account.owner, "account") {
        return resp;
    }

    match services
        .entries
        .list_entries(account.id, page.limit, page.offset)
        .await
    {
        Ok(items) => Json(dto::ListResponse { items }).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Validate a path id and fetch the account (400 / 404 on failure).
pub(crate) async fn load_account(services: &AppServices, raw_id: i64) -> Result<Account, axum::response::Response> {
    let id = AccountId::parse_positive(raw_id).map_err(errors::domain_error_to_response)?;
    services
        .accounts
        .get_account(id)
        .await
        .map_err(errors::store_error_to_response)
}
