// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the cluster registry.
//!
//! [`RegistryRuntime`] wires the store, the cluster configuration file, the
//! initial reconciliation and the config watcher together, and hands out the
//! [`ClusterService`] used by request handlers.
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_registry::runtime::RegistryRuntime;
//! use cluster_registry::store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = store::connect("postgres://...", 10).await?;
//!
//!     let runtime = RegistryRuntime::builder()
//!         .store(store)
//!         .config_file("/etc/registry/clusters.conf.json")
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let clusters = runtime.cluster_service().list_clusters(None).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cluster_config::ClusterConfigSource;
use crate::config::{Config, DEFAULT_TRANSACTION_TIMEOUT};
use crate::reconcile::ReconciliationService;
use crate::service::{AllowAll, Authorizer, ClusterService, ServiceAccountAllowList};
use crate::store::{IsolationLevel, Store};
use crate::transaction::{TransactionCoordinator, TransactionSettings};
use crate::watcher::{ConfigWatcher, ConfigWatcherConfig, WatcherHandle};

/// Builder for creating a [`RegistryRuntime`].
pub struct RegistryRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    config_file: PathBuf,
    transaction_timeout: Duration,
    isolation_level: IsolationLevel,
    watch_config: bool,
    authorizer: Option<Arc<dyn Authorizer>>,
    watcher_config: ConfigWatcherConfig,
}

impl Default for RegistryRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            config_file: PathBuf::from("clusters.conf.json"),
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            isolation_level: IsolationLevel::Default,
            watch_config: true,
            authorizer: None,
            watcher_config: ConfigWatcherConfig::default(),
        }
    }
}

impl RegistryRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backing store (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the cluster configuration file.
    ///
    /// Default: `clusters.conf.json`
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    /// Set the deadline for one unit of work.
    ///
    /// Default: 5 minutes
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Set the isolation level for new transactions.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Enable or disable hot reload of the configuration file.
    ///
    /// Default: enabled
    pub fn watch_config(mut self, enabled: bool) -> Self {
        self.watch_config = enabled;
        self
    }

    /// Set the authorizer for mutating requests.
    ///
    /// Default: [`AllowAll`]
    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// Set the config watcher timings.
    pub fn watcher_config(mut self, config: ConfigWatcherConfig) -> Self {
        self.watcher_config = config;
        self
    }

    /// Apply process configuration loaded by [`Config::from_env`].
    ///
    /// The store is connected separately from `config.database_url`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.config_file = config.cluster_config_file.clone();
        self.transaction_timeout = config.transaction_timeout;
        self.isolation_level = config.isolation_level;
        self.watch_config = config.watch_cluster_config;
        if let Some(accounts) = &config.authorized_service_accounts {
            let allow_list = ServiceAccountAllowList::new(accounts.iter().cloned());
            self.authorizer = Some(Arc::new(allow_list));

        }
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<RegistryRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        if self.transaction_timeout.is_zero() {
            anyhow::bail!("transaction_timeout must be greater than zero");
        }

        Ok(RegistryRuntimeConfig {
            store,
            config_file: self.config_file,
            settings: TransactionSettings {
                timeout: self.transaction_timeout,
                isolation_level: self.isolation_level,
            },
            watch_config: self.watch_config,
            authorizer: self.authorizer.unwrap_or_else(|| Arc::new(AllowAll)),
            watcher_config: self.watcher_config,
        })
    }
}

/// Configuration for a [`RegistryRuntime`].
pub struct RegistryRuntimeConfig {
    store: Arc<dyn Store>,
    config_file: PathBuf,
    settings: TransactionSettings,
    watch_config: bool,
    authorizer: Arc<dyn Authorizer>,
    watcher_config: ConfigWatcherConfig,
}

impl RegistryRuntimeConfig {
    /// Load the configuration file, run the initial sync and start the watcher.
    ///
    /// A configuration file that cannot be loaded at startup is fatal.
    pub async fn start(self) -> Result<RegistryRuntime> {
        let source = Arc::new(
            ClusterConfigSource::load(&self.config_file).with_context(|| {
                format!(
                    "failed to load cluster configuration from {}",
                    self.config_file.display()
                )
            })?,
        );

        let coordinator = TransactionCoordinator::new(self.store.clone(), self.settings.clone());
        let reconciler = ReconciliationService::new(coordinator.clone(), source.clone());

        let report = reconciler
            .sync_current()
            .await
            .context("initial cluster synchronization failed")?;
        info!(
            backend = self.store.backend(),
            created = report.created,
            updated = report.updated,
            "Initial cluster synchronization complete"
        );

        let watcher = if self.watch_config {
            Some(ConfigWatcher::start(
                source.clone(),
                reconciler.clone(),
                self.watcher_config,
            )?)
        } else {
            info!("Cluster configuration hot reload disabled");
            None
        };

        let service = ClusterService::new(coordinator.clone(), self.authorizer);

        Ok(RegistryRuntime {
            coordinator,
            source,
            reconciler,
            service,
            watcher,
        })
    }
}

/// A running cluster registry.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct RegistryRuntime {
    coordinator: TransactionCoordinator,
    source: Arc<ClusterConfigSource>,
    reconciler: ReconciliationService,
    service: ClusterService,
    watcher: Option<WatcherHandle>,
}

impl RegistryRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> RegistryRuntimeBuilder {
        RegistryRuntimeBuilder::new()
    }

    /// Request-path operations.
    pub fn cluster_service(&self) -> &ClusterService {
        &self.service
    }

    /// The loaded cluster configuration.
    pub fn config_source(&self) -> &Arc<ClusterConfigSource> {
        &self.source
    }

    /// The reconciler, for on-demand syncs.
    pub fn reconciler(&self) -> &ReconciliationService {
        &self.reconciler
    }

    /// The transaction coordinator.
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// The config watcher, if hot reload is enabled.
    pub fn watcher(&self) -> Option<&WatcherHandle> {
        self.watcher.as_ref()
    }

    /// Stop the watcher and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        info!("RegistryRuntime shutting down...");

        match self.watcher {
            Some(watcher) => watcher.stop().await,
            None => debug!("Hot reload was disabled, no watcher to stop"),
        }

        info!("RegistryRuntime shutdown complete");
        Ok(())
    }
}
