use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use ferrobank_auth::{NewSession, NewUser, Session, UpdateUser, User};
use ferrobank_core::{AccountId, EntryId, TransferId};
use ferrobank_ledger::{Account, Entry, ListAccounts, ListTransfers, NewAccount, NewTransfer, Transfer};

/// Storage operation error.
///
/// These are **infrastructure errors**. Callers classify them further
/// (the transfer engine folds them into `TransferError`, handlers into HTTP
/// statuses).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("unique violation: {0}")]
    UniqueViolation(String),

    #[error("check constraint violation: {0}")]
    CheckViolation(String),

    #[error("deadlock detected: {0}")]
    Deadlock(String),

    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    #[error("lock timeout: {0}")]
    LockTimeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Failures caused by contention or connectivity rather than by the data.
    ///
    /// The same request may succeed if the caller submits it again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Deadlock(_) | Self::SerializationFailure(_) | Self::LockTimeout(_) | Self::Connection(_)
        )
    }
}

/// Capability consumed by the transfer engine: open an atomic unit of work.
#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// One open atomic unit of work.
///
/// Writes are invisible to other units until [`UnitOfWork::commit`]. Dropping
/// a unit without committing rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn create_transfer(&mut self, new: &NewTransfer) -> Result<Transfer, StoreError>;

    async fn create_entry(&mut self, account_id: AccountId, amount: i64) -> Result<Entry, StoreError>;

    /// Lock the account row, add `delta` to its balance and return the
    /// updated row. The lock is held until the unit ends.
    async fn add_account_balance(&mut self, account_id: AccountId, delta: i64) -> Result<Account, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Open an account with a zero balance.
    async fn create_account(&self, new: &NewAccount) -> Result<Account, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Ordered by id.
    async fn list_accounts(&self, query: &ListAccounts) -> Result<Vec<Account>, StoreError>;

    /// Fails with `ForeignKeyViolation` while entries or transfers reference the account.
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EntryRepository: Send + Sync {
    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError>;

    async fn list_entries(&self, account_id: AccountId, limit: i64, offset: i64) -> Result<Vec<Entry>, StoreError>;
}

#[async_trait]
pub trait TransferRepository: Send + Sync {
    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError>;

    async fn list_transfers(&self, query: &ListTransfers) -> Result<Vec<Transfer>, StoreError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, new: &NewUser) -> Result<User, StoreError>;

    async fn get_user(&self, username: &str) -> Result<User, StoreError>;

    async fn update_user(&self, update: &UpdateUser) -> Result<User, StoreError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Fails with `ForeignKeyViolation` for an unknown user.
    async fn create_session(&self, new: &NewSession) -> Result<Session, StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError>;
}

#[async_trait]
impl<T> TransferStore for Arc<T>
where
    T: TransferStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin().await
    }
}
