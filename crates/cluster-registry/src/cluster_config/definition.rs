// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed cluster definition decoded from the configuration file.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Cluster, ClusterType};

/// One cluster as declared in the configuration file.
///
/// Decoded only after defaults have been injected, so every field is present.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterDefinition {
    /// Display name.
    pub name: String,
    /// API URL with a trailing slash.
    pub api_url: String,
    /// Console URL.
    pub console_url: String,
    /// Metrics URL.
    pub metrics_url: String,
    /// Logging URL.
    pub logging_url: String,
    /// Application DNS suffix.
    pub app_dns: String,
    /// Service account token.
    pub service_account_token: String,
    /// Service account user name.
    pub service_account_username: String,
    /// Whether the token is stored encrypted.
    pub service_account_token_encrypted: bool,
    /// Token provider id; empty means "resolve during reconciliation".
    pub token_provider_id: String,
    /// OAuth client id.
    pub auth_client_id: String,
    /// OAuth client secret.
    pub auth_client_secret: String,
    /// OAuth default scope.
    pub auth_client_default_scope: String,
    /// Deployment kind.
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    /// Whether the cluster refuses new tenants.
    pub capacity_exhausted: bool,
}

impl ClusterDefinition {
    /// Build a new cluster record from this definition.
    ///
    /// Timestamps are placeholders; the store sets the real values.
    pub fn to_cluster(&self, id: Uuid, token_provider_id: String) -> Cluster {
        let now = Utc::now();
        let mut cluster = Cluster {
            id,
            name: String::new(),
            url: String::new(),
            console_url: String::new(),
            metrics_url: String::new(),
            logging_url: String::new(),
            app_dns: String::new(),
            cluster_type: ClusterType::default(),
            capacity_exhausted: false,
            sa_token: String::new(),
            sa_username: String::new(),
            sa_token_encrypted: false,
            auth_client_id: String::new(),
            auth_client_secret: String::new(),
            auth_default_scope: String::new(),
            token_provider_id: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.apply_to(&mut cluster, token_provider_id);
        cluster
    }

    /// Overwrite every mutable field of `cluster`. The id is left alone.
    pub fn apply_to(&self, cluster: &mut Cluster, token_provider_id: String) {
        cluster.name = self.name.clone();
        cluster.url = self.api_url.clone();
        cluster.console_url = self.console_url.clone();
        cluster.metrics_url = self.metrics_url.clone();
        cluster.logging_url = self.logging_url.clone();
        cluster.app_dns = self.app_dns.clone();
        cluster.cluster_type = self.cluster_type;
        cluster.capacity_exhausted = self.capacity_exhausted;
        cluster.sa_token = self.service_account_token.clone();
        cluster.sa_username = self.service_account_username.clone();
        cluster.sa_token_encrypted = self.service_account_token_encrypted;
        cluster.auth_client_id = self.auth_client_id.clone();
        cluster.auth_client_secret = self.auth_client_secret.clone();
        cluster.auth_default_scope = self.auth_client_default_scope.clone();
        cluster.token_provider_id = token_provider_id;
    }
}

impl std::fmt::Debug for ClusterDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterDefinition")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("type", &self.cluster_type)
            .field("token_provider_id", &self.token_provider_id)
            .finish_non_exhaustive()
    }
}
