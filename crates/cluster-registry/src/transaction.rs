// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transaction coordinator.
//!
//! [`ServiceContext::execute`] runs a unit of work inside exactly one store
//! transaction:
//!
//! - a context that is already in a transaction runs the work inline; the
//!   outermost call owns commit and rollback,
//! - otherwise a transaction is opened and the work runs on its own tokio task,
//!   raced against the configured deadline,
//! - `Ok` commits, `Err` or a panic rolls back, and the deadline rolls back
//!   and returns [`Error::TransactionTimeout`].
//!
//! A timed-out unit of work is not aborted. Its transaction is marked closed
//! and its cancellation token fired, so any later write it attempts fails with
//! [`Error::TransactionClosed`] instead of reaching the store. The caller gets
//! [`Error::TransactionTimeout`] at once; the rollback runs on a detached task
//! that waits for any statement still in flight.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinError;
use tracing::{debug, error, warn};

use crate::config::DEFAULT_TRANSACTION_TIMEOUT;
use crate::context::{ServiceContext, TransactionHandle, TransactionState};
use crate::error::{Error, Result};
use crate::store::{IsolationLevel, Store};

/// Process-wide transaction settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct TransactionSettings {
    /// Deadline for one unit of work.
    pub timeout: Duration,
    /// Isolation level for new transactions.
    pub isolation_level: IsolationLevel,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TRANSACTION_TIMEOUT,
            isolation_level: IsolationLevel::Default,
        }
    }
}

/// Creates service contexts over one store.
///
/// Holds no per-call state; every [`context`](Self::context) is independent.
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn Store>,
    settings: TransactionSettings,
}

impl TransactionCoordinator {
    /// Create a coordinator.
    pub fn new(store: Arc<dyn Store>, settings: TransactionSettings) -> Self {
        Self { store, settings }
    }

    /// A fresh, idle service context.
    pub fn context(&self) -> ServiceContext {
        ServiceContext::new(self.store.clone(), self.settings.clone())
    }

    /// Run `work` in a transaction on a fresh context.
    pub async fn execute<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(ServiceContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.context().execute(work).await
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The transaction settings.
    pub fn settings(&self) -> &TransactionSettings {
        &self.settings
    }
}

impl ServiceContext {
    /// Run `work` inside a transaction.
    ///
    /// `work` receives a context bound to the transaction; nested `execute`
    /// calls on it (or clones of it) run inline. See the [module
    /// docs](crate::transaction) for the commit/rollback rules.
    pub async fn execute<T, F, Fut>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(ServiceContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.in_transaction() {
            return work(self.clone()).await;
        }

        let timeout = self.settings.timeout;
        let transaction = self.store.begin(self.settings.isolation_level).await?;
        let handle = TransactionHandle::new(transaction);
        let inner = self.with_state(TransactionState::InTransaction(handle.clone()));
        let _active = ActiveTransaction::enter(&mut self.state, handle.clone());

        let task = tokio::spawn(async move { work(inner).await });

        let outcome = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(join_error_into_error(join_error)),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Unit of work exceeded transaction timeout, rolling back"
                );
                handle.cancel.cancel();
                handle.transaction.mark_closed();
                // The abandoned work may hold the connection in a blocked
                // statement; roll back once it lets go.
                let abandoned = handle.clone();
                tokio::spawn(async move { rollback(&abandoned).await });
                return Err(Error::TransactionTimeout { timeout });
            }
        };

        match outcome {
            Ok(value) => {
                handle.transaction.commit().await?;
                debug!("Transaction committed");
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "Unit of work failed, rolling back");
                rollback(&handle).await;
                Err(err)
            }
        }
    }
}

/// Marks a context as in-transaction for the lifetime of one `execute` call.
///
/// Dropping it (normal return, error, timeout, or the caller dropping the
/// `execute` future) reverts the state to idle and fires the cancellation
/// token.
struct ActiveTransaction<'a> {
    state: &'a mut TransactionState,
    handle: TransactionHandle,
}

impl<'a> ActiveTransaction<'a> {
    fn enter(state: &'a mut TransactionState, handle: TransactionHandle) -> Self {
        *state = TransactionState::InTransaction(handle.clone());
        Self { state, handle }
    }
}

impl Drop for ActiveTransaction<'_> {
    fn drop(&mut self) {
        self.handle.cancel.cancel();
        *self.state = TransactionState::Idle;
    }
}

/// Roll back, logging failures; the caller's primary error wins.
async fn rollback(handle: &TransactionHandle) {
    if let Err(e) = handle.transaction.rollback().await {
        error!(error = %e, "Failed to roll back transaction");
    }
}

fn join_error_into_error(err: JoinError) -> Error {
    if err.is_panic() {
        let payload = err.into_panic();
        Error::Panic {
            message: panic_message(payload.as_ref()),
        }
    } else {
        Error::Other("unit of work was cancelled".to_string())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
