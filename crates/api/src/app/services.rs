//! Service wiring: picks a store and builds everything handlers depend on.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use ferrobank_auth::{Hs256TokenMaker, TokenError, TokenMaker};
use ferrobank_infra::store::{
    AccountRepository, EntryRepository, InMemoryStore, PostgresStore, SessionRepository, StoreError,
    TransferRepository, TransferStore, UserRepository,
};
use ferrobank_infra::{AppConfig, TransferEngine};

/// Everything request handlers need, injected as an axum `Extension`.
#[derive(Clone)]
pub struct AppServices {
    pub accounts: Arc<dyn AccountRepository>,
    pub entries: Arc<dyn EntryRepository>,
    pub transfers: Arc<dyn TransferRepository>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub engine: TransferEngine<Arc<dyn TransferStore>>,
    pub tokens: Arc<dyn TokenMaker>,
    pub lifetimes: TokenLifetimes,
}

/// How long minted tokens stay valid.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: chrono::Duration,
    /// Also the lifetime of the login session.
    pub refresh: chrono::Duration,
}

impl TokenLifetimes {
    fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let convert = |d: Duration| chrono::Duration::from_std(d).map_err(|_| StartupError::TokenDuration(d));
        Ok(Self {
            access: convert(config.access_token_duration)?,
            refresh: convert(config.refresh_token_duration)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("token maker: {0}")]
    Token(#[from] TokenError),

    #[error("invalid token duration: {0:?}")]
    TokenDuration(Duration),
}

impl AppServices {
    /// Wire services over any store implementing every repository.
    pub fn from_store<S>(
        store: S,
        tokens: Arc<dyn TokenMaker>,
        lifetimes: TokenLifetimes,
        transfer_timeout: Option<Duration>,
    ) -> Self
    where
        S: TransferStore
            + AccountRepository
            + EntryRepository
            + TransferRepository
            + UserRepository
            + SessionRepository
            + 'static,
    {
        let store = Arc::new(store);
        let transfer_store: Arc<dyn TransferStore> = store.clone();
        Self {
            accounts: store.clone(),
            entries: store.clone(),
            transfers: store.clone(),
            users: store.clone(),
            sessions: store,
            engine: TransferEngine::new(transfer_store).with_timeout(transfer_timeout),
            tokens,
            lifetimes,
        }
    }
}

/// Connect to Postgres when configured (ensuring the schema), otherwise run
/// on the in-memory store.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    let tokens: Arc<dyn TokenMaker> = Arc::new(Hs256TokenMaker::new(config.token_symmetric_key.as_bytes())?);
    let lifetimes = TokenLifetimes::from_config(config)?;

    match &config.database {
        Some(db) => {
            let store = PostgresStore::connect(db).await?;
            store.ensure_schema().await?;
            tracing::info!("using postgres store");
            Ok(AppServices::from_store(store, tokens, lifetimes, config.transfer_timeout))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            Ok(AppServices::from_store(
                InMemoryStore::new(),
                tokens,
                lifetimes,
                config.transfer_timeout,
            ))
        }
    }
}
