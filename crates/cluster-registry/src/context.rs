// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service context handed to business logic.
//!
//! A [`ServiceContext`] is created per request (or per reconciliation run) and
//! is never shared between independent callers. It carries a two-state
//! machine:
//!
//! ```text
//!        execute()                      execute() returns
//!   Idle ──────────────► InTransaction ───────────────────► Idle
//!                         │        ▲
//!                         └────────┘
//!                   nested execute() runs inline
//! ```
//!
//! While idle, [`ServiceContext::repository`] runs each operation on its own
//! pooled connection. While in a transaction it runs them on the shared
//! transaction, so every context in one call tree sees the same writes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::store::{Repository, Store, StoreTransaction};
use crate::transaction::TransactionSettings;

/// The open transaction of one `execute` call tree.
#[derive(Clone)]
pub struct TransactionHandle {
    pub(crate) transaction: Arc<dyn StoreTransaction>,
    pub(crate) cancel: CancellationToken,
}

impl TransactionHandle {
    pub(crate) fn new(transaction: Arc<dyn StoreTransaction>) -> Self {
        Self {
            transaction,
            cancel: CancellationToken::new(),
        }
    }

    /// Repository view bound to the transaction.
    pub fn repository(&self) -> &dyn Repository {
        self.transaction.repository()
    }

    /// Token cancelled when the owning `execute` call returns or times out.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Transaction state of a [`ServiceContext`].
#[derive(Clone, Default)]
pub enum TransactionState {
    /// No transaction; operations go straight to the store.
    #[default]
    Idle,
    /// Inside a transaction; operations use its repository view.
    InTransaction(TransactionHandle),
}

impl std::fmt::Debug for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::InTransaction(_) => f.write_str("InTransaction"),
        }
    }
}

/// Handle passed to business logic.
#[derive(Clone)]
pub struct ServiceContext {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) settings: TransactionSettings,
    pub(crate) state: TransactionState,
}

impl ServiceContext {
    /// Create an idle context over `store`.
    pub fn new(store: Arc<dyn Store>, settings: TransactionSettings) -> Self {
        Self {
            store,
            settings,
            state: TransactionState::Idle,
        }
    }

    /// Current transaction state.
    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    /// Whether operations currently run inside a transaction.
    pub fn in_transaction(&self) -> bool {
        matches!(self.state, TransactionState::InTransaction(_))
    }

    /// Transaction settings used by [`execute`](Self::execute).
    pub fn settings(&self) -> &TransactionSettings {
        &self.settings
    }

    /// The repository view for the current state.
    pub fn repository(&self) -> &dyn Repository {
        match &self.state {
            TransactionState::Idle => self.store.repository(),
            TransactionState::InTransaction(handle) => handle.repository(),
        }
    }

    /// Cancellation token of the enclosing transaction, if any.
    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        match &self.state {
            TransactionState::Idle => None,
            TransactionState::InTransaction(handle) => Some(handle.cancellation_token()),
        }
    }

    /// Resolves once the enclosing transaction has ended (including by timeout).
    ///
    /// Never resolves for an idle context. Long-running units of work can
    /// `select!` on this to stop early after a timeout.
    pub async fn cancelled(&self) {
        match self.cancellation_token() {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }

    pub(crate) fn with_state(&self, state: TransactionState) -> Self {
        Self {
            store: self.store.clone(),
            settings: self.settings.clone(),
            state,
        }
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("backend", &self.store.backend())
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish()
    }
}
