//! Canonical order for touching account rows inside one unit of work.
//!
//! A transfer updates two account rows. If two concurrent transfers lock
//! those rows in opposite orders (A then B, B then A) each ends up waiting on
//! the other. Every execution therefore applies its balance legs in
//! ascending account-id order, which makes a circular wait impossible.

use serde::{Deserialize, Serialize};

use ferrobank_core::AccountId;

/// Which side of the transfer a leg belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    From,
    To,
}

/// A signed balance delta for one account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLeg {
    pub account_id: AccountId,
    pub delta: i64,
    pub side: Side,
}

/// Strategy used to sequence the balance legs of a transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOrder {
    /// Lowest account id first. The only order production code uses.
    #[default]
    AscendingId,
    /// Sender first, receiver second, regardless of ids.
    ///
    /// Deadlock-prone under opposing concurrent transfers; kept so tests can
    /// demonstrate that [`LockOrder::AscendingId`] is what prevents it.
    ArgumentOrder,
}

impl LockOrder {
    /// Return `legs` (given in argument order, sender first) in the order
    /// they must be applied.
    pub fn sequence(self, legs: [BalanceLeg; 2]) -> [BalanceLeg; 2] {
        let [first, second] = legs;
        match self {
            LockOrder::ArgumentOrder => [first, second],
            LockOrder::AscendingId if first.account_id <= second.account_id => [first, second],
            LockOrder::AscendingId => [second, first],
        }
    }
}
