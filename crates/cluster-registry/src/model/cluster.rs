// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster profile record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Kind of cluster deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClusterType {
    /// OpenShift Dedicated.
    #[serde(rename = "OSD")]
    Osd,
    /// OpenShift Container Platform.
    #[serde(rename = "OCP")]
    Ocp,
    /// OpenShift Online.
    #[default]
    #[serde(rename = "OSO")]
    Oso,
}

impl ClusterType {
    /// All accepted cluster types.
    pub const ALL: [ClusterType; 3] = [ClusterType::Osd, ClusterType::Ocp, ClusterType::Oso];

    /// Wire/storage form of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Osd => "OSD",
            Self::Ocp => "OCP",
            Self::Oso => "OSO",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ClusterType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                Error::bad_parameter("type", format!("'{}' is not one of OSD, OCP, OSO", s))
            })
    }
}

/// A registered cluster: endpoints, credentials and OAuth client.
#[derive(Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Opaque store key.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// API URL, always with a trailing slash. Natural key for reconciliation.
    pub url: String,
    /// Web console URL.
    pub console_url: String,
    /// Metrics endpoint URL.
    pub metrics_url: String,
    /// Logging endpoint URL.
    pub logging_url: String,
    /// DNS suffix of applications deployed on the cluster.
    pub app_dns: String,
    /// Deployment kind.
    pub cluster_type: ClusterType,
    /// Whether the cluster refuses new tenants.
    pub capacity_exhausted: bool,
    /// Service account token.
    pub sa_token: String,
    /// Service account user name.
    pub sa_username: String,
    /// Whether `sa_token` is stored encrypted.
    pub sa_token_encrypted: bool,
    /// OAuth client id.
    pub auth_client_id: String,
    /// OAuth client secret.
    pub auth_client_secret: String,
    /// OAuth default scope.
    pub auth_default_scope: String,
    /// Stable identifier of the token provider for this cluster.
    pub token_provider_id: String,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

// Credentials stay out of logs.
impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url)
            .field("console_url", &self.console_url)
            .field("metrics_url", &self.metrics_url)
            .field("logging_url", &self.logging_url)
            .field("app_dns", &self.app_dns)
            .field("cluster_type", &self.cluster_type)
            .field("capacity_exhausted", &self.capacity_exhausted)
            .field("sa_token", &"[REDACTED]")
            .field("sa_username", &self.sa_username)
            .field("sa_token_encrypted", &self.sa_token_encrypted)
            .field("auth_client_id", &self.auth_client_id)
            .field("auth_client_secret", &"[REDACTED]")
            .field("auth_default_scope", &self.auth_default_scope)
            .field("token_provider_id", &self.token_provider_id)
            .finish()
    }
}

impl Cluster {
    /// Check the fields a stored cluster must carry.
    ///
    /// URLs must be absolute http(s) URLs; names, DNS suffix and every
    /// credential string must be non-empty.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("app-dns", &self.app_dns),
            ("service-account-token", &self.sa_token),
            ("service-account-username", &self.sa_username),
            ("auth-client-id", &self.auth_client_id),
            ("auth-client-secret", &self.auth_client_secret),
            ("auth-client-default-scope", &self.auth_default_scope),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::bad_parameter(field, "must not be empty"));
            }
        }

        for (field, value) in [
            ("api-url", &self.url),
            ("console-url", &self.console_url),
            ("metrics-url", &self.metrics_url),
            ("logging-url", &self.logging_url),
        ] {
            parse_cluster_url(value).map_err(|message| Error::bad_parameter(field, message))?;

        }

        Ok(())
    }
}

/// Append a trailing slash unless one is already there.
pub fn with_trailing_slash(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Parse an absolute http(s) URL with a host.
pub fn parse_cluster_url(raw: &str) -> std::result::Result<url::Url, String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| format!("'{}' is not a valid URL: {}", raw, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("'{}' must use http or https", raw));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(format!("'{}' has no host", raw));
    }
    Ok(parsed)
}
