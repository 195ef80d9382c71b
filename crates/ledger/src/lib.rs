//! Ledger domain (accounts, entries, transfers).
//!
//! Pure domain types only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod entry;
pub mod lock_order;
pub mod transfer;

pub use account::{Account, ListAccounts, NewAccount};
pub use entry::{AdjustmentResult, BalanceAdjustment, Entry};
pub use lock_order::{BalanceLeg, LockOrder, Side};
pub use transfer::{ListTransfers, NewTransfer, Transfer, TransferRequest, TransferResult};
