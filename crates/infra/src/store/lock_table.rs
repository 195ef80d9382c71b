//! Logical row locks for the in-memory store.
//!
//! Each open unit of work is a transaction id. A transaction holds an
//! account's lock from its first balance update until it commits or rolls
//! back. Waiters are tracked in a wait-for graph: a request that would close
//! a cycle fails immediately with `StoreError::Deadlock`, which is how
//! Postgres reports the same situation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use ferrobank_core::AccountId;

use super::r#trait::StoreError;

pub(crate) type TxId = u64;

#[derive(Debug, Default)]
struct LockState {
    owners: HashMap<AccountId, TxId>,
    /// A transaction waits on at most one account at a time.
    waits_for: HashMap<TxId, AccountId>,
}

impl LockState {
    /// Would `tx` waiting on a lock held by `holder` close a cycle?
    fn closes_cycle(&self, tx: TxId, holder: TxId) -> bool {
        let mut current = holder;
        for _ in 0..=self.waits_for.len() {
            if current == tx {
                return true;
            }
            let Some(account) = self.waits_for.get(&current) else {
                return false;
            };
            let Some(next) = self.owners.get(account) else {
                return false;
            };
            current = *next;
        }
        false
    }
}

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    state: Mutex<LockState>,
    released: Notify,
}

impl LockTable {
    /// Block until `tx` holds the lock on `account`. Re-entrant.
    pub(crate) async fn acquire(
        &self,
        tx: TxId,
        account: AccountId,
        timeout: Option<Duration>,
    ) -> Result<(), StoreError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // Registered before inspecting the table so a release between the
            // check and the await is not missed.
            let released = self.released.notified();

            {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| StoreError::Database("lock table poisoned".to_string()))?;

                match state.owners.get(&account).copied() {
                    None => {
                        state.owners.insert(account, tx);
                        state.waits_for.remove(&tx);
                        return Ok(());
                    }
                    Some(holder) if holder == tx => {
                        state.waits_for.remove(&tx);
                        return Ok(());
                    }
                    Some(holder) => {
                        if state.closes_cycle(tx, holder) {
                            state.waits_for.remove(&tx);
                            return Err(StoreError::Deadlock(format!(
                                "transaction {tx} waiting on account {account} held by transaction {holder}"
                            )));
                        }
                        state.waits_for.insert(tx, account);
                    }
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, released).await.is_err() {
                        self.stop_waiting(tx);
                        return Err(StoreError::LockTimeout(format!(
                            "account {account} still locked after {:?}",
                            timeout.unwrap_or_default()
                        )));
                    }
                }
                None => released.await,
            }
        }
    }

    /// Drop every lock and pending wait of `tx` and wake all waiters.
    pub(crate) fn release_all(&self, tx: TxId) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.owners.retain(|_, holder| *holder != tx);
        state.waits_for.remove(&tx);
        drop(state);
        self.released.notify_waiters();
    }

    fn stop_waiting(&self, tx: TxId) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.waits_for.remove(&tx);
    }

    #[cfg(test)]
    fn holder(&self, account: AccountId) -> Option<TxId> {
        self.state.lock().ok()?.owners.get(&account).copied()
    }
}
