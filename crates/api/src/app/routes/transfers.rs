use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use ferrobank_core::{AccountId, Currency, DomainError};
use ferrobank_ledger::{Account, ListTransfers, TransferRequest};

use crate::app::routes::accounts::load_account;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::{self, DEPOSITOR_OR_BANKER};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/", post(create_transfer).get(list_transfers))
}

pub async fn create_transfer(
    Extension(services): Extension<AppServices>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateTransferRequest>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_role(&principal, DEPOSITOR_OR_BANKER) {
        return resp;
    }

    let (request, currency) = match parse_transfer(&body) {
        Ok(parsed) => parsed,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let from = match load_account(&services, body.from_account_id).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let to = match load_account(&services, body.to_account_id).await {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    for account in [&from, &to] {
        if let Err(resp) = ensure_currency(account, currency) {
            return resp;
        }
    }
    if let Err(resp) = authz::require_owner(&principal, &from.owner, "from account") {
        return resp;
    }

    match services.engine.execute(&request).await {
        Ok(result) => (StatusCode::CREATED, Json(result)).into_response(),
        Err(e) => errors::transfer_error_to_response(e),
    }
}

pub async fn list_transfers(
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

    let listing = ListTransfers {
        owner,
        limit: page.limit,
        offset: page.offset,
    };
    match services.transfers.list_transfers(&listing).await {
        Ok(items) => Json(dto::ListResponse { items }).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Structural checks that need no store access.
fn parse_transfer(body: &dto::CreateTransferRequest) -> Result<(TransferRequest, Currency), DomainError> {
    let from = AccountId::parse_positive(body.from_account_id)?;
    let to = AccountId::parse_positive(body.to_account_id)?;
    let currency: Currency = body.currency.parse()?;

    let mut request = TransferRequest::new(from, to, body.amount);
    request.description = body.description.clone();
    request.validate()?;
    Ok((request, currency))
}

fn ensure_currency(account: &Account, currency: Currency) -> Result<(), axum::response::Response> {
    if account.currency != currency {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "currency_mismatch",
            format!(
                "account {} currency mismatch: {} vs {}",
                account.id, account.currency, currency
            ),
        ));
    }
    Ok(())
}
