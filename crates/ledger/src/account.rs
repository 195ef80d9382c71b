use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferrobank_core::{AccountId, Currency};

/// An account row.
///
/// `balance` is in the smallest unit of `currency` and always equals the sum
/// of the entries posted against the account. Only the transfer engine and
/// explicit balance adjustments change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub currency: Currency,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening an account. New accounts always start at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub owner: String,
    pub currency: Currency,
}

/// Owner-scoped page request (`LIMIT` / `OFFSET`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListAccounts {
    pub owner: String,
    pub limit: i64,
    pub offset: i64,
}
