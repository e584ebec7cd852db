// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster Registry - Cluster Profiles and Identity Links
//!
//! This crate tracks compute clusters (endpoints, credentials, OAuth client)
//! and which user identities are linked to which cluster. Cluster profiles
//! are declared in a JSON file that is hot-reloaded and reconciled into the
//! store while request handlers keep running.
//!
//! # Architecture
//!
//! ```text
//!  clusters.conf.json                         API layer
//!         │ fs events                              │
//!         ▼                                        ▼
//! ┌───────────────┐   reload   ┌──────────────┐  ┌────────────────┐
//! │ ConfigWatcher │──────────►│ ConfigSource │  │ ClusterService │
//! └───────┬───────┘            └──────────────┘  └───────┬────────┘
//!         │ sync                                          │
//!         ▼                                               │
//! ┌──────────────────────┐                                │
//! │ ReconciliationService│                                │
//! └──────────┬───────────┘                                │
//!            │ execute(work)                              │ execute(work)
//!            ▼                                            ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            ServiceContext / TransactionCoordinator                  │
//! │     one transaction per call tree, deadline, panic → error          │
//! └─────────────────────────────────┬───────────────────────────────────┘
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                  Store (PostgreSQL or SQLite)                       │
//! │              clusters, identity_clusters (cascade)                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Transactions
//!
//! | Situation | Outcome |
//! |-----------|---------|
//! | work returns `Ok` | commit, value returned |
//! | work returns `Err` | rollback, error returned |
//! | work panics | rollback, [`Error::Panic`] |
//! | deadline passes | rollback, [`Error::TransactionTimeout`]; later writes by the abandoned work fail with [`Error::TransactionClosed`] |
//! | nested `execute` | runs inline in the outer transaction |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CLUSTER_REGISTRY_DATABASE_URL` | Yes | - | `postgres://` or `sqlite:` URL |
//! | `CLUSTER_REGISTRY_CONFIG_FILE` | No | `clusters.conf.json` | Cluster definitions |
//! | `CLUSTER_REGISTRY_TRANSACTION_TIMEOUT_SECS` | No | `300` | Transaction deadline |
//! | `CLUSTER_REGISTRY_ISOLATION_LEVEL` | No | `default` | Transaction isolation level |
//! | `CLUSTER_REGISTRY_MAX_CONNECTIONS` | No | `10` | Pool size |
//! | `CLUSTER_REGISTRY_WATCH_CONFIG` | No | `true` | Hot-reload the definitions file |
//! | `CLUSTER_REGISTRY_SERVICE_ACCOUNTS` | No | - | Comma-separated allow-list for mutations |
//!
//! # Modules
//!
//! - [`cluster_config`]: Parsing, defaults and validation of the definitions file
//! - [`config`]: Process configuration from environment variables
//! - [`context`]: Service context and its transaction state
//! - [`error`]: Error types and categories
//! - [`model`]: Cluster and identity link records
//! - [`reconcile`]: Upsert of configured clusters into the store
//! - [`runtime`]: Embeddable runtime wiring everything together
//! - [`service`]: Request-path operations and authorization
//! - [`store`]: Persistence traits with PostgreSQL and SQLite backends
//! - [`transaction`]: Transaction coordinator
//! - [`watcher`]: Hot reload of the definitions file

#![deny(missing_docs)]

/// Database migrations for the cluster registry.
pub mod migrations;

/// Cluster definitions file: parsing, defaults, validation and snapshots.
pub mod cluster_config;

/// Process configuration loaded from environment variables.
pub mod config;

/// Service context handed to business logic.
pub mod context;

/// Error types for registry operations.
pub mod error;

/// Cluster and identity link records.
pub mod model;

/// Reconciliation of stored clusters against the definitions file.
pub mod reconcile;

/// Embeddable runtime.
pub mod runtime;

/// Request-path cluster operations and authorization.
pub mod service;

/// Persistence traits and backends.
pub mod store;

/// Transaction coordinator.
pub mod transaction;

/// Background hot reload of the definitions file.
pub mod watcher;

pub use context::ServiceContext;
pub use error::{Error, ErrorKind, Result};
pub use transaction::{TransactionCoordinator, TransactionSettings};
