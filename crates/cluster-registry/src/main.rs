// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster Registry server
//!
//! Loads the cluster definitions file, reconciles it into the store and keeps
//! watching it for changes until interrupted.

use tracing::{info, warn};

use cluster_registry::config::Config;
use cluster_registry::runtime::RegistryRuntime;
use cluster_registry::store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cluster_registry=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        config_file = %config.cluster_config_file.display(),
        transaction_timeout_secs = config.transaction_timeout.as_secs(),
        isolation_level = %config.isolation_level,
        watch = config.watch_cluster_config,
        "Starting Cluster Registry"
    );

    let store = store::connect(&config.database_url, config.max_connections).await?;


    info!(backend = store.backend(), "Connected to database");

    let runtime = RegistryRuntime::builder()
        .store(store)
        .with_config(&config)
        .build()?
        .start()
        .await?;

    info!(
        clusters = runtime.config_source().snapshot().len(),
        "Cluster Registry ready"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Cluster Registry shut down");

    Ok(())
}
