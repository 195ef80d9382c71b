use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferrobank_core::{AccountId, DomainError, DomainResult, TransferId};

use crate::lock_order::{BalanceLeg, Side};
use crate::{Account, Entry};

/// Business record of a from → to movement of funds (immutable).
///
/// Always paired with exactly two entries whose amounts cancel out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Always positive.
    pub amount: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    pub fn touches(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

/// Row to insert into the transfer store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub description: Option<String>,
}

/// Input of the transfer engine.
///
/// Ownership and currency checks happen in the request handler before the
/// engine sees this; [`TransferRequest::validate`] only covers what the engine
/// can check without touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
}

impl TransferRequest {
    pub fn new(from: AccountId, to: AccountId, amount: i64) -> Self {
        Self {
            from_account_id: from,
            to_account_id: to,
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.amount <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        if self.from_account_id == self.to_account_id {
            return Err(DomainError::validation(
                "from and to accounts must be different",
            ));
        }
        Ok(())
    }

    pub fn to_new_transfer(&self) -> NewTransfer {
        NewTransfer {
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
            description: self.description.clone(),
        }
    }

    /// The two balance legs in argument order: debit the sender, credit the receiver.
    pub fn legs(&self) -> [BalanceLeg; 2] {
        [
            BalanceLeg {
                account_id: self.from_account_id,
                delta: -self.amount,
                side: Side::From,
            },
            BalanceLeg {
                account_id: self.to_account_id,
                delta: self.amount,
                side: Side::To,
            },
        ]
    }
}

/// Everything a committed transfer produced, snapshotted inside the same
/// unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// Page of transfers touching any account owned by `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTransfers {
    pub owner: String,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(n: i64) -> AccountId {
        AccountId::new(n)
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(TransferRequest::new(id(1), id(2), 0).validate().is_err());
        assert!(TransferRequest::new(id(1), id(2), -5).validate().is_err());
        assert!(TransferRequest::new(id(1), id(2), 5).validate().is_ok());
    }

    #[test]
    fn rejects_self_transfer() {
        let err = TransferRequest::new(id(3), id(3), 10).validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("different")));
    }

    #[test]
    fn new_transfer_carries_description() {
        let req = TransferRequest::new(id(1), id(2), 30).with_description("rent");
        let row = req.to_new_transfer();
        assert_eq!(row.amount, 30);
        assert_eq!(row.description.as_deref(), Some("rent"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the two legs of any valid transfer cancel out and name
        /// the request's accounts on the right sides.
        #[test]
        fn legs_are_symmetric(
            from in 1i64..10_000,
            to in 1i64..10_000,
            amount in 1i64..1_000_000_000,
        ) {
            prop_assume!(from != to);
            let req = TransferRequest::new(id(from), id(to), amount);
            prop_assert!(req.validate().is_ok());

            let [debit, credit] = req.legs();
            prop_assert_eq!(debit.delta + credit.delta, 0);
            prop_assert_eq!(debit.delta, -amount);
            prop_assert_eq!(debit.account_id, id(from));
            prop_assert_eq!(credit.account_id, id(to));
            prop_assert_eq!(debit.side, Side::From);
            prop_assert_eq!(credit.side, Side::To);
        }
    }
}
