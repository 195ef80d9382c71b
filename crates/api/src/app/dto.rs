use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ferrobank_auth::User;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RenewAccessRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct AdjustBalanceRequest {
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `?page_id=&page_size=&username=` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page_id: Option<i64>,
    pub page_size: Option<i64>,
    pub username: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct LoginUserResponse {
    pub session_id: Uuid,
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct RenewAccessResponse {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

// -------------------------
// Pagination
// -------------------------

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MIN_PAGE_SIZE: i64 = 5;
pub const MAX_PAGE_SIZE: i64 = 10;

/// Validated `LIMIT` / `OFFSET` pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl ListQuery {
    pub fn page(&self) -> Result<Page, axum::response::Response> {
        let page_id = self.page_id.unwrap_or(1);
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

        if page_id < 1 {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "page_id must be at least 1",
            ));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("page_size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"),
            ));
        }

        Ok(Page {
            limit: page_size,
            offset: (page_id - 1).saturating_mul(page_size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page_id: Option<i64>, page_size: Option<i64>) -> ListQuery {
        ListQuery {
            page_id,
            page_size,
            username: None,
        }
    }

    #[test]
    fn pagination_defaults_and_offsets() {
        assert_eq!(query(None, None).page().unwrap(), Page { limit: 10, offset: 0 });
        assert_eq!(query(Some(3), Some(5)).page().unwrap(), Page { limit: 5, offset: 10 });
    }

    #[test]
    fn pagination_bounds() {
        assert!(query(Some(0), None).page().is_err());
        assert!(query(None, Some(4)).page().is_err());
        assert!(query(None, Some(11)).page().is_err());
    }
}
