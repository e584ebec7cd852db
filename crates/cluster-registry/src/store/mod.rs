// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for the cluster registry.
//!
//! [`Repository`] holds the record operations. A [`Store`] exposes a direct
//! repository view over its pool and opens [`StoreTransaction`]s, which expose
//! the same repository view bound to one database transaction.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Cluster, ClusterType, IdentityCluster};

/// Transaction isolation level applied when a transaction is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Whatever the database defaults to.
    #[default]
    Default,
    /// READ COMMITTED.
    ReadCommitted,
    /// REPEATABLE READ.
    RepeatableRead,
    /// SERIALIZABLE.
    Serializable,
}

impl IsolationLevel {
    /// SQL fragment for `SET TRANSACTION ISOLATION LEVEL`, if any.
    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::RepeatableRead => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        })
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "default" => Ok(Self::Default),
            "read-committed" => Ok(Self::ReadCommitted),
            "repeatable-read" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            other => Err(Error::bad_parameter(
                "isolation-level",
                format!("unknown isolation level '{}'", other),
            )),
        }
    }
}

/// Record operations on clusters and identity links.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Load a cluster by its id.
    async fn load_cluster(&self, id: Uuid) -> Result<Option<Cluster>>;

    /// Load a cluster by its (normalized) API URL.
    async fn load_cluster_by_url(&self, url: &str) -> Result<Option<Cluster>>;

    /// Insert a cluster. Timestamps are set by the store.
    ///
    /// Fails with [`Error::AlreadyExists`] when the id or URL is taken.
    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster>;

    /// Overwrite every mutable field of an existing cluster, keyed by id.
    ///
    /// Fails with [`Error::NotFound`] when no row has that id.
    async fn save_cluster(&self, cluster: &Cluster) -> Result<Cluster>;

    /// Hard-delete a cluster; its identity links go with it.
    ///
    /// Returns whether a row was deleted.
    async fn delete_cluster(&self, id: Uuid) -> Result<bool>;

    /// List clusters ordered by URL, optionally filtered by type.
    async fn list_clusters(&self, cluster_type: Option<ClusterType>) -> Result<Vec<Cluster>>;

    /// Link an identity to a cluster.
    async fn create_identity_cluster(
        &self,
        identity_id: Uuid,
        cluster_id: Uuid,
    ) -> Result<IdentityCluster>;

    /// Load one identity link.
    async fn load_identity_cluster(
        &self,
        identity_id: Uuid,
        cluster_id: Uuid,
    ) -> Result<Option<IdentityCluster>>;

    /// Delete the link between an identity and the cluster with the given URL.
    ///
    /// Returns the number of deleted rows.
    async fn delete_identity_cluster_by_url(
        &self,
        identity_id: Uuid,
        cluster_url: &str,
    ) -> Result<u64>;

    /// List the links of one identity.
    async fn list_identity_clusters(&self, identity_id: Uuid) -> Result<Vec<IdentityCluster>>;

    /// List the clusters linked to one identity, ordered by URL.
    async fn list_clusters_for_identity(&self, identity_id: Uuid) -> Result<Vec<Cluster>>;
}

/// A backing store: a direct repository view plus transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Repository view that runs each operation on its own pooled connection.
    fn repository(&self) -> &dyn Repository;

    /// Open a transaction.
    async fn begin(&self, isolation: IsolationLevel) -> Result<Arc<dyn StoreTransaction>>;
}

/// One open database transaction.
///
/// After [`commit`](Self::commit) or [`rollback`](Self::rollback) the
/// transaction is closed and every repository operation on it fails with
/// [`Error::TransactionClosed`].
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Repository view bound to this transaction.
    fn repository(&self) -> &dyn Repository;

    /// Commit and close.
    async fn commit(&self) -> Result<()>;

    /// Roll back and close.
    async fn rollback(&self) -> Result<()>;

    /// Refuse further statements and commits without waiting for an
    /// in-flight statement. The pending rollback still goes through.
    fn mark_closed(&self);

    /// Whether the transaction has been committed or rolled back.
    async fn is_closed(&self) -> bool;
}

/// Cluster row as read back from either backend (ids selected as text).
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ClusterRow {
    pub cluster_id: String,
    pub name: String,
    pub url: String,
    pub console_url: String,
    pub metrics_url: String,
    pub logging_url: String,
    pub app_dns: String,
    pub cluster_type: String,
    pub capacity_exhausted: bool,
    pub sa_token: String,
    pub sa_username: String,
    pub sa_token_encrypted: bool,
    pub auth_client_id: String,
    pub auth_client_secret: String,
    pub auth_default_scope: String,
    pub token_provider_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ClusterRow> for Cluster {
    type Error = Error;

    fn try_from(row: ClusterRow) -> Result<Self> {
        Ok(Cluster {
            id: parse_stored_uuid("cluster_id", &row.cluster_id)?,
            cluster_type: row.cluster_type.parse().map_err(|_| {
                Error::Other(format!(
                    "stored cluster '{}' has unknown type '{}'",
                    row.url, row.cluster_type
                ))
            })?,
            name: row.name,
            url: row.url,
            console_url: row.console_url,
            metrics_url: row.metrics_url,
            logging_url: row.logging_url,
            app_dns: row.app_dns,
            capacity_exhausted: row.capacity_exhausted,
            sa_token: row.sa_token,
            sa_username: row.sa_username,
            sa_token_encrypted: row.sa_token_encrypted,
            auth_client_id: row.auth_client_id,
            auth_client_secret: row.auth_client_secret,
            auth_default_scope: row.auth_default_scope,
            token_provider_id: row.token_provider_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Identity link row as read back from either backend.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct IdentityClusterRow {
    pub identity_id: String,
    pub cluster_id: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<IdentityClusterRow> for IdentityCluster {
    type Error = Error;

    fn try_from(row: IdentityClusterRow) -> Result<Self> {
        Ok(IdentityCluster {
            identity_id: parse_stored_uuid("identity_id", &row.identity_id)?,
            cluster_id: parse_stored_uuid("cluster_id", &row.cluster_id)?,
            created_at: row.created_at,
        })
    }
}

fn parse_stored_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        Error::Other(format!(
            "stored {} '{}' is not a UUID: {}",
            column, value, e
        ))
    })
}

pub(crate) fn rows_into<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Map a unique-key violation to [`Error::AlreadyExists`].
pub(crate) fn map_unique_violation(
    entity: &'static str,
    key: impl ToString,
) -> impl FnOnce(sqlx::Error) -> Error {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::AlreadyExists {
            entity,
            key: key.to_string(),
        },
        _ => Error::Database(err),
    }
}

/// Connect to the store named by a database URL and run its migrations.
///
/// `postgres://` / `postgresql://` URLs open a [`PostgresStore`]; `sqlite:`
/// URLs open a [`SqliteStore`].
pub async fn connect(database_url: &str, max_connections: u32) -> Result<Arc<dyn Store>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let store = PostgresStore::connect(database_url, max_connections).await?;
        Ok(Arc::new(store))
    } else if database_url.starts_with("sqlite:") {
        let store = SqliteStore::connect(database_url, max_connections).await?;
        Ok(Arc::new(store))
    } else {
        Err(Error::bad_parameter(
            "database-url",
            "expected a postgres:// or sqlite: URL",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_parse() {
        assert_eq!(
            "".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Default
        );

        assert_eq!(
            "read-committed".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            "REPEATABLE_READ".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "serializable".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Serializable
        );
        assert!("snapshot".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::Default.as_sql(), None);
        assert_eq!(IsolationLevel::Serializable.as_sql(), Some("SERIALIZABLE"));
        assert_eq!(IsolationLevel::ReadCommitted.to_string(), "read-committed");
    }

    #[test]
    fn test_cluster_row_with_bad_type_is_rejected() {
        let now = Utc::now();
        let row = ClusterRow {
            cluster_id: Uuid::new_v4().to_string(),
            name: "c1".to_string(),
            url: "https://api.c1/".to_string(),
            console_url: "https://console.c1/console/".to_string(),
            metrics_url: "https://metrics.c1/".to_string(),
            logging_url: "https://console.c1/console/".to_string(),
            app_dns: "apps.c1".to_string(),
            cluster_type: "K8S".to_string(),
            capacity_exhausted: false,
            sa_token: "t".to_string(),
            sa_username: "u".to_string(),
            sa_token_encrypted: true,
            auth_client_id: "id".to_string(),
            auth_client_secret: "s".to_string(),
            auth_default_scope: "scope".to_string(),
            token_provider_id: String::new(),
            created_at: now,
            updated_at: now,
        };

        assert!(Cluster::try_from(row).is_err());
    }
}
