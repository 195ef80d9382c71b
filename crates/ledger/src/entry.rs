use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferrobank_core::{AccountId, DomainError, DomainResult, EntryId};

use crate::Account;

/// One signed balance delta posted against a single account (immutable).
///
/// Positive amounts credit the account, negative amounts debit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Single-leg balance adjustment (deposit when positive, withdrawal when negative).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    pub account_id: AccountId,
    pub amount: i64,
}

impl BalanceAdjustment {
    pub fn validate(&self) -> DomainResult<()> {
        if self.amount == 0 {
            return Err(DomainError::validation("adjustment amount must be non-zero"));
        }
        Ok(())
    }
}

/// Outcome of a committed [`BalanceAdjustment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentResult {
    pub account: Account,
    pub entry: Entry,
}
