//! Postgres-backed store.
//!
//! Account rows are the only contended resource. The balance primitive is a
//! single `UPDATE ... SET balance = balance + $delta ... RETURNING`, which
//! takes the row lock and holds it until the transaction ends, so concurrent
//! adjustments of the same account serialize instead of losing updates.
//!
//! ## Error Mapping
//!
//! | SQLSTATE | Meaning | StoreError |
//! |----------|---------|------------|
//! | `23503` | foreign_key_violation | `ForeignKeyViolation` |
//! | `23505` | unique_violation | `UniqueViolation` |
//! | `23514` | check_violation | `CheckViolation` |
//! | `22003` | numeric_value_out_of_range | `CheckViolation` |
//! | `40P01` | deadlock_detected | `Deadlock` |
//! | `40001` | serialization_failure | `SerializationFailure` |
//! | `55P03` | lock_not_available | `LockTimeout` |
//! | `08xxx` | connection exception | `Connection` |
//! | other | | `Database` |
//!
//! Pool and IO failures (`PoolTimedOut`, `PoolClosed`, `Io`, `Tls`) map to
//! `Connection`; `RowNotFound` maps to `NotFound`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use ferrobank_auth::{NewSession, NewUser, Role, Session, UpdateUser, User};
use ferrobank_core::{AccountId, Currency, EntryId, TransferId};
use ferrobank_ledger::{Account, Entry, ListAccounts, ListTransfers, NewAccount, NewTransfer, Transfer};

use super::r#trait::{
    AccountRepository, EntryRepository, SessionRepository, StoreError, TransferRepository, TransferStore,
    UnitOfWork, UserRepository,
};
use crate::config::DatabaseConfig;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Postgres implementation of every store trait.
///
/// Cheap to clone: `PgPool` is reference-counted.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Applied to every unit of work via `SET LOCAL lock_timeout`.
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Build a pool from configuration and wrap it.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        tracing::info!("connected to postgres");
        Ok(Self::new(pool).with_lock_timeout(config.lock_timeout))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl TransferStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;

        if let Some(timeout) = self.lock_timeout {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set lock_timeout", e))?;
        }

        Ok(Box::new(PostgresUnitOfWork { tx }))
    }
}

/// An open `sqlx` transaction. Dropping it without commit rolls back.
struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    #[instrument(skip(self, new), fields(from = %new.from_account_id, to = %new.to_account_id), err)]
    async fn create_transfer(&mut self, new: &NewTransfer) -> Result<Transfer, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, from_account_id, to_account_id, amount, description, created_at
            "#,
        )
        .bind(new.from_account_id.get())
        .bind(new.to_account_id.get())
        .bind(new.amount)
        .bind(new.description.as_deref())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_transfer", e))?;

        transfer_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn create_entry(&mut self, account_id: AccountId, amount: i64) -> Result<Entry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(account_id.get())
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_entry", e))?;

        entry_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn add_account_balance(&mut self, account_id: AccountId, delta: i64) -> Result<Account, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(account_id.get())
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("add_account_balance", e))?
        .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?;

        account_from_row(&row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl AccountRepository for PostgresStore {
    #[instrument(skip(self, new), fields(owner = %new.owner, currency = %new.currency), err)]
    async fn create_account(&self, new: &NewAccount) -> Result<Account, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, 0, $2)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&new.owner)
        .bind(new.currency.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        account_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn get_account(&self, id: AccountId) -> Result<Account, StoreError> {
        let row = sqlx::query("SELECT id, owner, balance, currency, created_at FROM accounts WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;

        account_from_row(&row)
    }

    #[instrument(skip(self, query), fields(owner = %query.owner), err)]
    async fn list_accounts(&self, query: &ListAccounts) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE owner = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&query.owner)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_accounts", e))?;

        rows.iter().map(account_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl EntryRepository for PostgresStore {
    #[instrument(skip(self), err)]
    async fn get_entry(&self, id: EntryId) -> Result<Entry, StoreError> {
        let row = sqlx::query("SELECT id, account_id, amount, created_at FROM entries WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_entry", e))?
            .ok_or_else(|| StoreError::NotFound(format!("entry {id}")))?;

        entry_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn list_entries(&self, account_id: AccountId, limit: i64, offset: i64) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id.get())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }
}

#[async_trait]
impl TransferRepository for PostgresStore {
    #[instrument(skip(self), err)]
    async fn get_transfer(&self, id: TransferId) -> Result<Transfer, StoreError> {
        let row = sqlx::query(
            "SELECT id, from_account_id, to_account_id, amount, description, created_at FROM transfers WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_transfer", e))?
        .ok_or_else(|| StoreError::NotFound(format!("transfer {id}")))?;

        transfer_from_row(&row)
    }

    #[instrument(skip(self, query), fields(owner = %query.owner), err)]
    async fn list_transfers(&self, query: &ListTransfers) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.from_account_id, t.to_account_id, t.amount, t.description, t.created_at
            FROM transfers t
            WHERE t.from_account_id IN (SELECT id FROM accounts WHERE owner = $1)
               OR t.to_account_id IN (SELECT id FROM accounts WHERE owner = $1)
            ORDER BY t.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&query.owner)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transfers", e))?;

        rows.iter().map(transfer_from_row).collect()
    }
}

#[async_trait]
impl UserRepository for PostgresStore {
    #[instrument(skip(self, new), fields(username = %new.username), err)]
    async fn create_user(&self, new: &NewUser) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, role, hashed_password, full_name, email)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING username, role, hashed_password, full_name, email, password_changed_at, created_at
            "#,
        )
        .bind(&new.username)
        .bind(new.role.as_str())
        .bind(&new.hashed_password)
        .bind(&new.full_name)
        .bind(&new.email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;

        user_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT username, role, hashed_password, full_name, email, password_changed_at, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user", e))?
        .ok_or_else(|| StoreError::NotFound(format!("user '{username}'")))?;

        user_from_row(&row)
    }

    #[instrument(skip(self, update), fields(username = %update.username), err)]
    async fn update_user(&self, update: &UpdateUser) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET
                hashed_password = COALESCE($2, hashed_password),
                password_changed_at = CASE WHEN $2::varchar IS NULL THEN password_changed_at ELSE now() END,
                full_name = COALESCE($3, full_name),
                email = COALESCE($4, email)
            WHERE username = $1
            RETURNING username, role, hashed_password, full_name, email, password_changed_at, created_at
            "#,
        )
        .bind(&update.username)
        .bind(update.hashed_password.as_deref())
        .bind(update.full_name.as_deref())
        .bind(update.email.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?
        .ok_or_else(|| StoreError::NotFound(format!("user '{}'", update.username)))?;

        user_from_row(&row)
    }
}

#[async_trait]
impl SessionRepository for PostgresStore {
    #[instrument(skip(self, new), fields(session_id = %new.id, username = %new.username), err)]
    async fn create_session(&self, new: &NewSession) -> Result<Session, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO sessions (id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at
            "#,
        )
        .bind(new.id)
        .bind(&new.username)
        .bind(&new.refresh_token)
        .bind(&new.user_agent)
        .bind(&new.client_ip)
        .bind(new.is_blocked)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_session", e))?;

        session_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_session", e))?
        .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;

        session_from_row(&row)
    }
}

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, StoreError> {
    result.map_err(|e| StoreError::Database(format!("failed to decode row: {e}")))
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let currency: String = decode(row.try_get("currency"))?;
    Ok(Account {
        id: AccountId::new(decode(row.try_get("id"))?),
        owner: decode(row.try_get("owner"))?,
        currency: currency
            .parse::<Currency>()
            .map_err(|e| StoreError::Database(format!("failed to decode row: {e}")))?,
        balance: decode(row.try_get("balance"))?,
        created_at: decode(row.try_get("created_at"))?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<Entry, StoreError> {
    Ok(Entry {
        id: EntryId::new(decode(row.try_get("id"))?),
        account_id: AccountId::new(decode(row.try_get("account_id"))?),
        amount: decode(row.try_get("amount"))?,
        created_at: decode(row.try_get("created_at"))?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer, StoreError> {
    Ok(Transfer {
        id: TransferId::new(decode(row.try_get("id"))?),
        from_account_id: AccountId::new(decode(row.try_get("from_account_id"))?),
        to_account_id: AccountId::new(decode(row.try_get("to_account_id"))?),
        amount: decode(row.try_get("amount"))?,
        description: decode(row.try_get("description"))?,
        created_at: decode(row.try_get("created_at"))?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let role: String = decode(row.try_get("role"))?;
    Ok(User {
        username: decode(row.try_get("username"))?,
        role: role
            .parse::<Role>()
            .map_err(|e| StoreError::Database(format!("failed to decode row: {e}")))?,
        hashed_password: decode(row.try_get("hashed_password"))?,
        full_name: decode(row.try_get("full_name"))?,
        email: decode(row.try_get("email"))?,
        password_changed_at: decode(row.try_get("password_changed_at"))?,
        created_at: decode(row.try_get("created_at"))?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: decode(row.try_get("id"))?,
        username: decode(row.try_get("username"))?,
        refresh_token: decode(row.try_get("refresh_token"))?,
        user_agent: decode(row.try_get("user_agent"))?,
        client_ip: decode(row.try_get("client_ip"))?,
        is_blocked: decode(row.try_get("is_blocked"))?,
        expires_at: decode(row.try_get("expires_at"))?,
        created_at: decode(row.try_get("created_at"))?,
    })
}

/// Map SQLx errors to `StoreError` (see the module docs for the table).
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{operation}: {}", db_err.message());
            classify_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("{operation}: row not found")),
        sqlx::Error::PoolTimedOut => StoreError::Connection(format!("{operation}: timed out waiting for a connection")),
        sqlx::Error::PoolClosed => StoreError::Connection(format!("{operation}: connection pool closed")),
        sqlx::Error::Io(e) => StoreError::Connection(format!("{operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Connection(format!("{operation}: {e}")),
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}

fn classify_sqlstate(code: Option<&str>, msg: String) -> StoreError {
    match code {
        Some("23503") => StoreError::ForeignKeyViolation(msg),
        Some("23505") => StoreError::UniqueViolation(msg),
        Some("23514") | Some("22003") => StoreError::CheckViolation(msg),
        Some("40P01") => StoreError::Deadlock(msg),
        Some("40001") => StoreError::SerializationFailure(msg),
        Some("55P03") => StoreError::LockTimeout(msg),
        Some(c) if c.starts_with("08") => StoreError::Connection(msg),
        _ => StoreError::Database(msg),
    }
}
