use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use ferrobank_auth::{NewSession, NewUser, Session, UpdateUser, User};
use ferrobank_core::{AccountId, EntryId, TransferId};
use ferrobank_ledger::{Account, Entry, ListAccounts, ListTransfers, NewAccount, NewTransfer, Transfer};

use super::lock_table::{LockTable, TxId};
use super::r#trait::{
    AccountRepository, EntryRepository, SessionRepository, StoreError, TransferRepository, TransferStore,
    UnitOfWork, UserRepository,
};

/// Knobs for the in-memory store.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryOptions {
    /// Give up waiting for a row lock after this long (`None` waits forever).
    pub lock_timeout: Option<Duration>,
    /// Sleep before every unit-of-work statement. Widens race windows in
    /// concurrency tests.
    pub statement_latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, User>,
    sessions: HashMap<Uuid, Session>,
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

impl Tables {
    fn account_referenced(&self, id: AccountId) -> bool {
        self.entries.values().any(|e| e.account_id == id) || self.transfers.values().any(|t| t.touches(id))
    }
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    locks: LockTable,
    options: InMemoryOptions,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    next_tx_id: AtomicU64,
}

impl Shared {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }

    async fn statement_delay(&self) {
        if let Some(latency) = self.options.statement_latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// In-memory implementation of every store trait.
///
/// Intended for tests/dev and for running the API without a database. Keeps
/// the same observable semantics as the Postgres store: referential checks,
/// unique constraints, uncommitted writes invisible to readers, row locks
/// held until commit.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_options(InMemoryOptions::default())
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: InMemoryOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                locks: LockTable::default(),
                options,
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of committed entries (all accounts).
    pub fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.shared.read()?.entries.len())
    }

    /// Number of committed transfers.
    pub fn transfer_count(&self) -> Result<usize, StoreError> {
        Ok(self.shared.read()?.transfers.len())
    }

    /// Sum of committed entry amounts posted against `account_id`.
    pub fn entry_sum(&self, account_id: AccountId) -> Result<i64, StoreError> {
        Ok(self
            .shared
            .read()?
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .map(|e| e.amount)
            .sum())
    }
}

fn page<T>(rows: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    rows.skip(usize::try_from(offset).unwrap_or(0))
        .take(usize::try_from(limit).unwrap_or(0))
        .collect()
}

#[async_trait]
impl TransferStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.shared.next_tx_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tx, "in-memory unit of work started");
        Ok(Box::new(InMemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            tx,
            accounts: HashMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
            finished: false,
        }))
    }
}

/// Staged writes of one in-memory transaction.
///
/// Nothing touches the shared tables until commit, so readers only ever see
/// committed state.
struct InMemoryUnitOfWork {
    shared: Arc<Shared>,
    tx: TxId,
    /// Locked accounts with their staged balance.
    accounts: HashMap<AccountId, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    finished: bool,
}

impl InMemoryUnitOfWork {
    fn ensure_account_exists(&self, id: AccountId, what: &str) -> Result<(), StoreError> {
        if self.shared.read()?.accounts.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!("{what} references missing account {id}")))
        }
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shared.locks.release_all(self.tx);
        }
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(tx = self.tx, "uncommitted unit of work dropped; rolling back");
            self.finish();
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn create_transfer(&mut self, new: &NewTransfer) -> Result<Transfer, StoreError> {
        self.shared.statement_delay().await;
        if new.amount <= 0 {
            return Err(StoreError::CheckViolation(format!(
                "transfer amount must be positive (got {})",
                new.amount
            )));
        }
        self.ensure_account_exists(new.from_account_id, "transfer")?;
        self.ensure_account_exists(new.to_account_id, "transfer")?;

        let transfer = Transfer {
            id: TransferId::new(self.shared.next_transfer_id.fetch_add(1, Ordering::Relaxed)),
            from_account_id: new.from_account_id,
            to_account_id: new.to_account_id,
            amount: new.amount,
            description: new.description.clone(),
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, account_id: AccountId, amount: i64) -> Result<Entry, StoreError> {
        self.shared.statement_delay().await;
        self.ensure_account_exists(account_id, "entry")?;

        let entry = Entry {
            id: EntryId::new(self.shared.next_entry_id.fetch_add(1, Ordering::Relaxed)),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(&mut self, account_id: AccountId, delta: i64) -> Result<Account, StoreError> {
        self.shared.statement_delay().await;
        let exists = self.shared.read()?.accounts.contains_key(&account_id);
        if !exists {
            return Err(StoreError::NotFound(format!("account {account_id}")));
        }

        self.shared
            .locks
            .acquire(self.tx, account_id, self.shared.options.lock_timeout)
            .await?;

        // Re-read under the lock: a previous holder may have committed a new balance.
        let mut account = match self.accounts.get(&account_id) {
            Some(staged) => staged.clone(),
            None => self
                .shared
                .read()?
                .accounts
                .get(&account_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?,
        };

        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| StoreError::CheckViolation(format!("balance of account {account_id} overflows")))?;
        self.accounts.insert(account_id, account.clone());
        Ok(account)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.shared.statement_delay().await;
        {
            let mut tables = self.shared.write()?;

            // Accounts can disappear between a statement and commit; Postgres
            // would have blocked the delete instead.
            let referenced = self
                .accounts
                .keys()
                .copied()
                .chain(self.entries.iter().map(|e| e.account_id))
                .chain(self.transfers.iter().flat_map(|t| [t.from_account_id, t.to_account_id]));
            let missing = referenced.into_iter().find(|id| !tables.accounts.contains_key(id));
            if let Some(id) = missing {
                drop(tables);
                self.finish();
                return Err(StoreError::ForeignKeyViolation(format!(
                    "account {id} was deleted before commit"
                )));
            }

            for (id, staged) in self.accounts.drain() {
                if let Some(account) = tables.accounts.get_mut(&id) {
                    account.balance = staged.balance;
                }
            }
            for entry in self.entries.drain(..) {
                tables.entries.insert(entry.id, entry);
            }
            for transfer in self.transfers.drain(..) {
                tables.transfers.insert(transfer.id, transfer);
            }
        }
        self.finish();
        tracing::trace!(tx = self.tx, "in-memory unit of work committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish();
        tracing::trace!(tx = self.tx, "in-memory unit of work rolled back");
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn create_account(&self, new: &NewAccount) -> Result<Account, StoreError> {
        let mut tables = self.shared.write()?;
        if !tables.users.contains_key(&new.owner) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "account owner '{}' does not exist",
                new.owner
            )));
        }
        if tables
            .accounts
            .values()
            .any(|a| a.owner == new.owner && a.currency == new.currency)
        {
            return Err(StoreError::UniqueViolation(format!(
                "'{}' already has a {} account",
                new.owner, new.currency
            )));
        }

        let account = Account {
            id: AccountId::new(self.shared.next_account_id.fetch_add(1, Ordering::Relaxed)),
            owner: new.owner.clone(),
            currency: new.currency,
            balance: 0,
            created_at: Utc::now(),
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.shared
            .read()?
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    async fn list_accounts(&self, query: &ListAccounts) -> Result<Vec<Account>, StoreError> {
        let tables = self.shared.read()?;
        let owned = tables.accounts.values().filter(|a| a.owner == query.owner).cloned();
        Ok(page(owned, query.limit, query.offset))
    }

    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        let mut tables = self.shared.write()?;
        if !tables.accounts.contains_key(&id) {
            return Err(StoreError::NotFound(format!("account {id}")));
        }
        if tables.account_referenced(id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "account {id} is referenced by entries or transfers"
            )));
        }
        tables.accounts.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl EntryRepository for InMemoryStore {
    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        self.shared
            .read()?
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("entry {id}")))
    }

    async fn list_entries(&self, account_id: AccountId, limit: i64, offset: i64) -> Result<Vec<Entry>, StoreError> {
        let tables = self.shared.read()?;
        let rows = tables.entries.values().filter(|e| e.account_id == account_id).cloned();
        Ok(page(rows, limit, offset))
    }
}

#[async_trait]
impl TransferRepository for InMemoryStore {
    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        self.shared
            .read()?
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))
    }

    async fn list_transfers(&self, query: &ListTransfers) -> Result<Vec<Transfer>, StoreError> {
        let tables = self.shared.read()?;
        let owned: Vec<AccountId> = tables
            .accounts
            .values()
            .filter(|a| a.owner == query.owner)
            .map(|a| a.id)
            .collect();
        let rows = tables
            .transfers
            .values()
            .filter(|t| owned.iter().any(|id| t.touches(*id)))
            .cloned();
        Ok(page(rows, query.limit, query.offset))
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create_user(&self, new: &NewUser) -> Result<User, StoreError> {
        let mut tables = self.shared.write()?;
        if tables.users.contains_key(&new.username) {
            return Err(StoreError::UniqueViolation(format!("username '{}' is taken", new.username)));
        }
        if tables.users.values().any(|u| u.email == new.email) {
            return Err(StoreError::UniqueViolation(format!("email '{}' is taken", new.email)));
        }

        let now = Utc::now();
        let user = User {
            username: new.username.clone(),
            role: new.role,
            hashed_password: new.hashed_password.clone(),
            full_name: new.full_name.clone(),
            email: new.email.clone(),
            password_changed_at: now,
            created_at: now,
        };
        tables.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        self.shared
            .read()?
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user '{username}'")))
    }

    async fn update_user(&self, update: &UpdateUser) -> Result<User, StoreError> {
        let mut tables = self.shared.write()?;
        if let Some(email) = &update.email {
            if tables
                .users
                .values()
                .any(|u| &u.email == email && u.username != update.username)
            {
                return Err(StoreError::UniqueViolation(format!("email '{email}' is taken")));
            }
        }
        let user = tables
            .users
            .get_mut(&update.username)
            .ok_or_else(|| StoreError::NotFound(format!("user '{}'", update.username)))?;
        update.apply_to(user, Utc::now());
        Ok(user.clone())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn create_session(&self, new: &NewSession) -> Result<Session, StoreError> {
        let mut tables = self.shared.write()?;
        if !tables.users.contains_key(&new.username) {
            return Err(StoreError::ForeignKeyViolation(format!("user '{}' does not exist", new.username)));
        }
        if tables.sessions.contains_key(&new.id) {
            return Err(StoreError::UniqueViolation(format!("session {} already exists", new.id)));
        }

        let session = Session {
            id: new.id,
            username: new.username.clone(),
            refresh_token: new.refresh_token.clone(),
            user_agent: new.user_agent.clone(),
            client_ip: new.client_ip.clone(),
            is_blocked: new.is_blocked,
            expires_at: new.expires_at,
            created_at: Utc::now(),
        };
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        self.shared
            .read()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }
}

#[cfg(test)]
mod tests {
    use ferrobank_auth::Role;
    use ferrobank_core::Currency;

    use super::*;

    async fn user(store: &InMemoryStore, name: &str) {
        store
            .create_user(&NewUser {
                username: name.to_string(),
                role: Role::Depositor,
                hashed_password: "hash".to_string(),
                full_name: "Test User".to_string(),
                email: format!("{name}@example.com"),
            })
            .await
            .unwrap();
    }

    async fn account(store: &InMemoryStore, owner: &str, currency: Currency) -> Account {
        store
            .create_account(&NewAccount {
                owner: owner.to_string(),
                currency,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn accounts_start_at_zero_and_are_unique_per_currency() {
        let store = InMemoryStore::new();
        user(&store, "alice").await;

        let usd = account(&store, "alice", Currency::Usd).await;
        assert_eq!(usd.balance, 0);
        assert_eq!(store.get_account(usd.id).await.unwrap(), usd);

        let dup = store
            .create_account(&NewAccount {
                owner: "alice".into(),
                currency: Currency::Usd,
            })
            .await
            .unwrap_err();
        assert!(matches!(dup, StoreError::UniqueViolation(_)));

        let orphan = store
            .create_account(&NewAccount {
                owner: "nobody".into(),
                currency: Currency::Usd,
            })
            .await
            .unwrap_err();
        assert!(matches!(orphan, StoreError::ForeignKeyViolation(_)));
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_dropped() {
        let store = InMemoryStore::new();
        user(&store, "alice").await;
        let a = account(&store, "alice", Currency::Usd).await;

        let mut uow = store.begin().await.unwrap();
        uow.create_entry(a.id, 40).await.unwrap();
        let staged = uow.add_account_balance(a.id, 40).await.unwrap();
        assert_eq!(staged.balance, 40);
        assert_eq!(store.get_account(a.id).await.unwrap().balance, 0);

        drop(uow);
        assert_eq!(store.get_account(a.id).await.unwrap().balance, 0);
        assert_eq!(store.entry_count().unwrap(), 0);

        // Lock was released by the drop.
        let mut uow = store.begin().await.unwrap();
        uow.create_entry(a.id, 5).await.unwrap();
        uow.add_account_balance(a.id, 5).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.get_account(a.id).await.unwrap().balance, 5);
        assert_eq!(store.entry_sum(a.id).unwrap(), 5);
    }

    #[tokio::test]
    async fn referential_checks() {
        let store = InMemoryStore::new();
        let missing = AccountId::new(99);

        let mut uow = store.begin().await.unwrap();
        assert!(matches!(
            uow.create_entry(missing, 1).await.unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));
        assert!(matches!(
            uow.add_account_balance(missing, 1).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn referenced_accounts_cannot_be_deleted() {
        let store = InMemoryStore::new();
        user(&store, "alice").await;
        let a = account(&store, "alice", Currency::Usd).await;
        let b = account(&store, "alice", Currency::Eur).await;

        let mut uow = store.begin().await.unwrap();
        uow.create_entry(a.id, 10).await.unwrap();
        uow.add_account_balance(a.id, 10).await.unwrap();
        uow.commit().await.unwrap();

        assert!(matches!(
            store.delete_account(a.id).await.unwrap_err(),
            StoreError::ForeignKeyViolation(_)
        ));
        store.delete_account(b.id).await.unwrap();
        assert!(matches!(store.get_account(b.id).await.unwrap_err(), StoreError::NotFound(_)));
        assert!(matches!(store.delete_account(b.id).await.unwrap_err(), StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn listing_is_owner_scoped_and_paged() {
        let store = InMemoryStore::new();
        user(&store, "alice").await;
        user(&store, "bob").await;
        for currency in Currency::ALL {
            account(&store, "alice", currency).await;
        }
        account(&store, "bob", Currency::Usd).await;

        let first = store
            .list_accounts(&ListAccounts {
                owner: "alice".into(),
                limit: 2,
                offset: 0,
            })
            .await
            .unwrap();
        let rest = store
            .list_accounts(&ListAccounts {
                owner: "alice".into(),
                limit: 2,
                offset: 2,
            })
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(rest.len(), 1);
        assert!(first.iter().chain(&rest).all(|a| a.owner == "alice"));
    }

    #[tokio::test]
    async fn user_email_is_unique() {
        let store = InMemoryStore::new();
        user(&store, "alice").await;
        user(&store, "bob").await;

        let err = store
            .update_user(&UpdateUser {
                username: "bob".into(),
                email: Some("alice@example.com".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        let updated = store
            .update_user(&UpdateUser {
                username: "bob".into(),
                full_name: Some("Bob Builder".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.full_name, "Bob Builder");
    }

    fn new_session(username: &str) -> NewSession {
        NewSession {
            id: Uuid::new_v4(),
            username: username.to_string(),
            refresh_token: "refresh".to_string(),
            user_agent: "curl/8".to_string(),
            client_ip: "10.0.0.1".to_string(),
            is_blocked: false,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn sessions_belong_to_existing_users() {
        let store = InMemoryStore::new();
        let err = store.create_session(&new_session("ghost")).await.unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation(_)));

        user(&store, "alice").await;
        let new = new_session("alice");
        let created = store.create_session(&new).await.unwrap();
        assert_eq!(created.id, new.id);
        assert_eq!(store.get_session(new.id).await.unwrap(), created);

        let err = store.create_session(&new).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        let err = store.get_session(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
