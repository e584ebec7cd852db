// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for cluster-registry integration tests.
//!
//! Provides an in-memory SQLite store, coordinators, and helpers for writing
//! cluster definition files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use cluster_registry::model::{Cluster, ClusterType};
use cluster_registry::store::{SqliteStore, Store};
use cluster_registry::{TransactionCoordinator, TransactionSettings};

/// Fresh in-memory store with migrations applied.
pub async fn sqlite_store() -> Arc<dyn Store> {
    Arc::new(
        SqliteStore::in_memory()
            .await
            .expect("Failed to open in-memory store"),
    )
}

/// Coordinator over `store` with the given deadline.
pub fn coordinator(store: Arc<dyn Store>, timeout: Duration) -> TransactionCoordinator {
    TransactionCoordinator::new(
        store,
        TransactionSettings {
            timeout,
            ..TransactionSettings::default()
        },
    )
}

/// A complete cluster record for direct store or service calls.
pub fn cluster(name: &str, url: &str) -> Cluster {
    let now = Utc::now();
    Cluster {
        id: Uuid::new_v4(),
        name: name.to_string(),
        url: url.to_string(),
        console_url: format!("https://console.{}.example.com/console/", name),
        metrics_url: format!("https://metrics.{}.example.com/", name),
        logging_url: format!("https://console.{}.example.com/console/", name),
        app_dns: format!("apps.{}.example.com", name),
        cluster_type: ClusterType::Osd,
        capacity_exhausted: false,
        sa_token: "sa-token".to_string(),
        sa_username: "sa-user".to_string(),
        sa_token_encrypted: true,
        auth_client_id: "client".to_string(),
        auth_client_secret: "secret".to_string(),
        auth_default_scope: "user:full".to_string(),
        token_provider_id: String::new(),
        created_at: now,
        updated_at: now,
    }
}

/// A cluster definition as it appears in the configuration file, mandatory keys only.
pub fn definition(name: &str, api_url: &str) -> Value {
    json!({
        "name": name,
        "api-url": api_url,
        "app-dns": format!("apps.{}.example.com", name),
        "service-account-token": format!("{}-token", name),
        "service-account-username": format!("{}-sa", name),
        "auth-client-id": format!("{}-client", name),
        "auth-client-secret": format!("{}-secret", name),
        "auth-client-default-scope": "user:full",
    })
}

/// Replace the configuration file atomically (write a sibling, then rename).
pub fn write_config(path: &Path, definitions: &[Value]) {
    let document = json!({ "clusters": definitions });
    let staging = path.with_extension("tmp");
    std::fs::write(&staging, document.to_string()).expect("Failed to write staging config");
    std::fs::rename(&staging, path).expect("Failed to move config into place");
}

/// Config file path inside `dir`.
pub fn config_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("clusters.conf.json")
}
