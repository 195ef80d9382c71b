//! Transfer transaction engine.
//!
//! Executes a transfer as one atomic unit of work:
//!
//! 1. begin
//! 2. insert the transfer record
//! 3. insert the debit entry (`-amount`) and the credit entry (`+amount`)
//! 4. adjust both balances, lowest account id first
//! 5. commit
//!
//! Any failure before the commit is issued (store error, cancellation,
//! deadline) rolls the unit back and surfaces as a single [`TransferError`].
//! Cancellation and the deadline are not observed once the commit is in
//! flight, so a `Cancelled` or `TimedOut` abort means nothing was applied.
//! The engine never retries and never deduplicates: submitting the same
//! request twice moves the money twice.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use ferrobank_core::DomainError;
use ferrobank_ledger::{AdjustmentResult, BalanceAdjustment, LockOrder, Side, TransferRequest, TransferResult};

use crate::store::{StoreError, TransferStore, UnitOfWork};

/// Why a unit of work was abandoned without a data-level cause.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    SerializationFailure,
    LockTimeout,
    Connection,
    Cancelled,
    TimedOut,
    Store,
}

/// Coarse classification handlers branch on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferErrorKind {
    InvalidRequest,
    NotFound,
    ConstraintViolation,
    Aborted,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] DomainError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("aborted ({reason:?}): {message}")]
    Aborted { reason: AbortReason, message: String },
}

impl TransferError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            Self::InvalidRequest(_) => TransferErrorKind::InvalidRequest,
            Self::NotFound(_) => TransferErrorKind::NotFound,
            Self::ConstraintViolation(_) => TransferErrorKind::ConstraintViolation,
            Self::Aborted { .. } => TransferErrorKind::Aborted,
        }
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::Aborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    fn aborted(reason: AbortReason, message: impl Into<String>) -> Self {
        Self::Aborted {
            reason,
            message: message.into(),
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => Self::NotFound(m),
            StoreError::ForeignKeyViolation(m) | StoreError::UniqueViolation(m) | StoreError::CheckViolation(m) => {
                Self::ConstraintViolation(m)
            }
            StoreError::Deadlock(m) => Self::aborted(AbortReason::Deadlock, m),
            StoreError::SerializationFailure(m) => Self::aborted(AbortReason::SerializationFailure, m),
            StoreError::LockTimeout(m) => Self::aborted(AbortReason::LockTimeout, m),
            StoreError::Connection(m) => Self::aborted(AbortReason::Connection, m),
            StoreError::Database(m) => Self::aborted(AbortReason::Store, m),
        }
    }
}

/// Stateless executor over a [`TransferStore`]. Clone it freely.
#[derive(Debug, Clone)]
pub struct TransferEngine<S> {
    store: S,
    lock_order: LockOrder,
    timeout: Option<Duration>,
}

impl<S> TransferEngine<S>
where
    S: TransferStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            lock_order: LockOrder::AscendingId,
            timeout: None,
        }
    }

    /// Override the balance-leg order. Only tests should pass anything but
    /// [`LockOrder::AscendingId`].
    pub fn with_lock_order(mut self, lock_order: LockOrder) -> Self {
        self.lock_order = lock_order;
        self
    }

    /// Deadline applied to every call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(&self, request: &TransferRequest) -> Result<TransferResult, TransferError> {
        self.execute_with_cancel(request, std::future::pending()).await
    }

    /// Like [`Self::execute`], but gives up (and rolls back) if `cancel`
    /// completes before the commit is issued. Once the commit is in flight
    /// the outcome is whatever the store reports.
    pub async fn execute_with_cancel<C>(
        &self,
        request: &TransferRequest,
        cancel: C,
    ) -> Result<TransferResult, TransferError>
    where
        C: Future<Output = ()> + Send,
    {
        let span = info_span!(
            "transfer",
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = request.amount,
        );

        async move {
            request.validate()?;

            let outcome = self.run_transfer(request, cancel).await;
            match &outcome {
                Ok(result) => info!(transfer_id = %result.transfer.id, "transfer committed"),
                Err(e) => warn!(error = %e, kind = ?e.kind(), "transfer aborted"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Post a single-leg deposit or withdrawal: one entry plus one balance
    /// update in one unit of work.
    pub async fn adjust_balance(&self, adjustment: &BalanceAdjustment) -> Result<AdjustmentResult, TransferError> {
        let span = info_span!("adjustment", account = %adjustment.account_id, amount = adjustment.amount);

        async move {
            adjustment.validate()?;

            let outcome = self.run_adjustment(adjustment).await;
            match &outcome {
                Ok(result) => info!(entry_id = %result.entry.id, balance = result.account.balance, "adjustment committed"),
                Err(e) => warn!(error = %e, kind = ?e.kind(), "adjustment aborted"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_transfer<C>(&self, request: &TransferRequest, cancel: C) -> Result<TransferResult, TransferError>
    where
        C: Future<Output = ()>,
    {
        let deadline = self.deadline();
        tokio::pin!(cancel);

        let mut uow = self.interruptible(cancel.as_mut(), deadline, self.store.begin()).await?;
        debug!(state = "started");
        let staged = self
            .interruptible(
                cancel.as_mut(),
                deadline,
                apply_transfer(self.lock_order, uow.as_mut(), request),
            )
            .await;
        self.settle(uow, staged, cancel.as_mut(), deadline).await
    }

    async fn run_adjustment(&self, adjustment: &BalanceAdjustment) -> Result<AdjustmentResult, TransferError> {
        let deadline = self.deadline();
        let cancel = std::future::pending::<()>();
        tokio::pin!(cancel);

        let mut uow = self.interruptible(cancel.as_mut(), deadline, self.store.begin()).await?;
        debug!(state = "started");
        let staged = self
            .interruptible(cancel.as_mut(), deadline, apply_adjustment(uow.as_mut(), adjustment))
            .await;
        self.settle(uow, staged, cancel.as_mut(), deadline).await
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| Instant::now() + t)
    }

    /// Race a pre-commit step against the caller's cancellation and the
    /// deadline. A losing step is dropped mid-flight; nothing it staged is
    /// committed.
    async fn interruptible<T, W, C>(
        &self,
        cancel: Pin<&mut C>,
        deadline: Option<Instant>,
        work: W,
    ) -> Result<T, TransferError>
    where
        W: Future<Output = Result<T, StoreError>>,
        C: Future<Output = ()>,
    {
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancel => Err(self.cancelled()),
            () = expired => Err(self.timed_out()),
            outcome = work => outcome.map_err(TransferError::from),
        }
    }

    /// Non-blocking check made right before the commit is issued.
    async fn interruption<C>(&self, cancel: Pin<&mut C>, deadline: Option<Instant>) -> Option<TransferError>
    where
        C: Future<Output = ()>,
    {
        if deadline.is_some_and(|at| Instant::now() >= at) {
            return Some(self.timed_out());
        }
        tokio::select! {
            biased;
            () = cancel => Some(self.cancelled()),
            () = std::future::ready(()) => None,
        }
    }

    /// Commit a fully staged unit, or roll back a failed one. The commit
    /// runs to completion regardless of cancellation or deadline.
    async fn settle<T, C>(
        &self,
        uow: Box<dyn UnitOfWork>,
        staged: Result<T, TransferError>,
        cancel: Pin<&mut C>,
        deadline: Option<Instant>,
    ) -> Result<T, TransferError>
    where
        C: Future<Output = ()>,
    {
        let value = match staged {
            Ok(value) => value,
            Err(err) => return Err(abandon(uow, err).await),
        };

        if let Some(err) = self.interruption(cancel, deadline).await {
            return Err(abandon(uow, err).await);
        }

        uow.commit().await?;
        debug!(state = "committed");
        Ok(value)
    }

    fn cancelled(&self) -> TransferError {
        TransferError::aborted(AbortReason::Cancelled, "cancelled by caller")
    }

    fn timed_out(&self) -> TransferError {
        TransferError::aborted(
            AbortReason::TimedOut,
            format!("did not complete within {:?}", self.timeout.unwrap_or_default()),
        )
    }
}

async fn apply_transfer(
    lock_order: LockOrder,
    uow: &mut dyn UnitOfWork,
    request: &TransferRequest,
) -> Result<TransferResult, StoreError> {
    let transfer = uow.create_transfer(&request.to_new_transfer()).await?;
    let from_entry = uow.create_entry(request.from_account_id, -request.amount).await?;
    let to_entry = uow.create_entry(request.to_account_id, request.amount).await?;
    debug!(state = "legs_written", transfer_id = %transfer.id);

    let [first_leg, second_leg] = lock_order.sequence(request.legs());
    let first = uow.add_account_balance(first_leg.account_id, first_leg.delta).await?;
    let second = uow.add_account_balance(second_leg.account_id, second_leg.delta).await?;
    debug!(state = "balances_adjusted", first_locked = %first_leg.account_id);

    let (from_account, to_account) = match first_leg.side {
        Side::From => (first, second),
        Side::To => (second, first),
    };

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

async fn apply_adjustment(
    uow: &mut dyn UnitOfWork,
    adjustment: &BalanceAdjustment,
) -> Result<AdjustmentResult, StoreError> {
    // Balance first so a missing account reports NotFound.
    let account = uow
        .add_account_balance(adjustment.account_id, adjustment.amount)
        .await?;
    let entry = uow.create_entry(adjustment.account_id, adjustment.amount).await?;
    Ok(AdjustmentResult { account, entry })
}

/// Roll back and hand the cause back to the caller.
async fn abandon(uow: Box<dyn UnitOfWork>, err: TransferError) -> TransferError {
    debug!(state = "aborted", error = %err);
    if let Err(rollback_err) = uow.rollback().await {
        warn!(error = %rollback_err, "rollback failed");
    }
    err
}
