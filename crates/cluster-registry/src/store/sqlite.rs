// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store.
//!
//! Used for embedded deployments and tests. SQLite transactions are always
//! serializable, so the requested isolation level is ignored.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteExecutor, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Cluster, ClusterType, IdentityCluster};

use super::{
    ClusterRow, IdentityClusterRow, IsolationLevel, Repository, Store, StoreTransaction,
    map_unique_violation, rows_into,
};

const CLUSTER_COLUMNS: &str = r#"
    cluster_id, name, url, console_url, metrics_url, logging_url, app_dns, cluster_type,
    capacity_exhausted, sa_token, sa_username, sa_token_encrypted, auth_client_id,
    auth_client_secret, auth_default_scope, token_provider_id, created_at, updated_at
"#;

const IDENTITY_CLUSTER_COLUMNS: &str = "identity_id, cluster_id, created_at";

/// SQLite store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url` and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Open a fresh in-memory database with migrations applied.
    ///
    /// The pool holds a single connection that never expires, since the
    /// database lives only as long as that connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn repository(&self) -> &dyn Repository {
        self
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Arc<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;

        debug!(isolation = %isolation, "Opened sqlite transaction (always serializable)");

        Ok(Arc::new(SqliteTransaction {
            tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl Repository for SqliteStore {
    async fn load_cluster(&self, id: Uuid) -> Result<Option<Cluster>> {
        load_cluster(&self.pool, id).await
    }

    async fn load_cluster_by_url(&self, url: &str) -> Result<Option<Cluster>> {
        load_cluster_by_url(&self.pool, url).await
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        create_cluster(&self.pool, cluster).await
    }

    async fn save_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        save_cluster(&self.pool, cluster).await
    }

    async fn delete_cluster(&self, id: Uuid) -> Result<bool> {
        delete_cluster(&self.pool, id).await
    }

    async fn list_clusters(&self, cluster_type: Option<ClusterType>) -> Result<Vec<Cluster>> {
        list_clusters(&self.pool, cluster_type).await
    }

    async fn create_identity_cluster(
        &self,
        identity_id: Uuid,
        cluster_id: Uuid,
    ) -> Result<IdentityCluster> {
        create_identity_cluster(&self.pool, identity_id, cluster_id).await
    }

    async fn load_identity_cluster(
        &self,
        identity_id: Uuid,
        cluster_id: Uuid,
    ) -> Result<Option<IdentityCluster>> {
        load_identity_cluster(&self.pool, identity_id, cluster_id).await
    }

    async fn delete_identity_cluster_by_url(
        &self,
        identity_id: Uuid,
        cluster_url: &str,
    ) -> Result<u64> {
        delete_identity_cluster_by_url(&self.pool, identity_id, cluster_url).await
    }

    async fn list_identity_clusters(&self, identity_id: Uuid) -> Result<Vec<IdentityCluster>> {
        list_identity_clusters(&self.pool, identity_id).await
    }

    async fn list_clusters_for_identity(&self, identity_id: Uuid) -> Result<Vec<Cluster>> {
        list_clusters_for_identity(&self.pool, identity_id).await
    }
}

/// A SQLite transaction shared by every context in one call tree.
pub struct SqliteTransaction {
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
    closed: AtomicBool,
}

/// Lock the transaction and bind `$conn` to its connection, or fail if closed.
macro_rules! with_conn {

    ($self:ident, |$conn:ident| $body:expr) => {{
        if $self.closed.load(Ordering::Acquire) {
            return Err(Error::TransactionClosed);
        }
        let mut guard = $self.tx.lock().await;
        if $self.closed.load(Ordering::Acquire) {
            return Err(Error::TransactionClosed);
        }
        let $conn: &mut SqliteConnection = guard.as_deref_mut().ok_or(Error::TransactionClosed)?;
        $body
    }};
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    fn repository(&self) -> &dyn Repository {
        self
    }

    async fn commit(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::TransactionClosed);
        }
        let tx = self.tx.lock().await.take().ok_or(Error::TransactionClosed)?;
        self.closed.store(true, Ordering::Release);
        tx.commit().await.map_err(Error::Commit)
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or(Error::TransactionClosed)?;
        self.closed.store(true, Ordering::Release);
        tx.rollback().await?;
        Ok(())
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    async fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.lock().await.is_none()
    }
}

#[async_trait]
impl Repository for SqliteTransaction {
    async fn load_cluster(&self, id: Uuid) -> Result<Option<Cluster>> {
        with_conn!(self, |conn| load_cluster(conn, id).await)
    }

    async fn load_cluster_by_url(&self, url: &str) -> Result<Option<Cluster>> {
        with_conn!(self, |conn| load_cluster_by_url(conn, url).await)
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        with_conn!(self, |conn| create_cluster(conn, cluster).await)
    }

    async fn save_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        with_conn!(self, |conn| save_cluster(conn, cluster).await)
    }

    async fn delete_cluster(&self, id: Uuid) -> Result<bool> {
        with_conn!(self, |conn| delete_cluster(conn, id).await)
    }

    async fn list_clusters(&self, cluster_type: Option<ClusterType>) -> Result<Vec<Cluster>> {
        with_conn!(self, |conn| list_clusters(conn, cluster_type).await)
    }

    async fn create_identity_cluster(
        &self,
        identity_id: Uuid,
        cluster_id: Uuid,
    ) -> Result<IdentityCluster> {
        with_conn!(self, |conn| {
            create_identity_cluster(conn, identity_id, cluster_id).await
        })
    }

    async fn load_identity_cluster(
        &self,
        identity_id: Uuid,
        cluster_id: Uuid,
    ) -> Result<Option<IdentityCluster>> {
        with_conn!(self, |conn| {
            load_identity_cluster(conn, identity_id, cluster_id).await
        })
    }

    async fn delete_identity_cluster_by_url(
        &self,
        identity_id: Uuid,
        cluster_url: &str,
    ) -> Result<u64> {
        with_conn!(self, |conn| {
            delete_identity_cluster_by_url(conn, identity_id, cluster_url).await
        })
    }

    async fn list_identity_clusters(&self, identity_id: Uuid) -> Result<Vec<IdentityCluster>> {
        with_conn!(self, |conn| list_identity_clusters(conn, identity_id).await)
    }

    async fn list_clusters_for_identity(&self, identity_id: Uuid) -> Result<Vec<Cluster>> {
        with_conn!(self, |conn| {
            list_clusters_for_identity(conn, identity_id).await
        })

    }
}

// ============================================================================
// Queries
// ============================================================================

async fn load_cluster<'e>(executor: impl SqliteExecutor<'e>, id: Uuid) -> Result<Option<Cluster>> {
    let query = format!(
        "SELECT {} FROM clusters WHERE cluster_id = ?",
        CLUSTER_COLUMNS
    );

    sqlx::query_as::<_, ClusterRow>(&query)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?
        .map(Cluster::try_from)
        .transpose()
}

async fn load_cluster_by_url<'e>(
    executor: impl SqliteExecutor<'e>,
    url: &str,
) -> Result<Option<Cluster>> {
    let query = format!("SELECT {} FROM clusters WHERE url = ?", CLUSTER_COLUMNS);
    sqlx::query_as::<_, ClusterRow>(&query)
        .bind(url)
        .fetch_optional(executor)
        .await?
        .map(Cluster::try_from)
        .transpose()
}

async fn create_cluster<'e>(
    executor: impl SqliteExecutor<'e>,
    cluster: &Cluster,
) -> Result<Cluster> {
    let now = Utc::now();
    let query = format!(
        r#"
        INSERT INTO clusters (
            cluster_id, name, url, console_url, metrics_url, logging_url, app_dns,
            cluster_type, capacity_exhausted, sa_token, sa_username, sa_token_encrypted,
            auth_client_id, auth_client_secret, auth_default_scope, token_provider_id,
            created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        CLUSTER_COLUMNS
    );

    let row = sqlx::query_as::<_, ClusterRow>(&query)
        .bind(cluster.id.to_string())
        .bind(&cluster.name)
        .bind(&cluster.url)
        .bind(&cluster.console_url)
        .bind(&cluster.metrics_url)
        .bind(&cluster.logging_url)
        .bind(&cluster.app_dns)
        .bind(cluster.cluster_type.as_str())
        .bind(cluster.capacity_exhausted)
        .bind(&cluster.sa_token)
        .bind(&cluster.sa_username)
        .bind(cluster.sa_token_encrypted)
        .bind(&cluster.auth_client_id)
        .bind(&cluster.auth_client_secret)
        .bind(&cluster.auth_default_scope)
        .bind(&cluster.token_provider_id)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
        .map_err(map_unique_violation("cluster", &cluster.url))?;

    Cluster::try_from(row)
}

async fn save_cluster<'e>(executor: impl SqliteExecutor<'e>, cluster: &Cluster) -> Result<Cluster> {
    let query = format!(
        r#"
        UPDATE clusters
        SET name = ?, url = ?, console_url = ?, metrics_url = ?, logging_url = ?,
            app_dns = ?, cluster_type = ?, capacity_exhausted = ?, sa_token = ?,
            sa_username = ?, sa_token_encrypted = ?, auth_client_id = ?,
            auth_client_secret = ?, auth_default_scope = ?, token_provider_id = ?,
            updated_at = ?
        WHERE cluster_id = ?
        RETURNING {}
        "#,
        CLUSTER_COLUMNS
    );

    let row = sqlx::query_as::<_, ClusterRow>(&query)
        .bind(&cluster.name)
        .bind(&cluster.url)
        .bind(&cluster.console_url)
        .bind(&cluster.metrics_url)
        .bind(&cluster.logging_url)
        .bind(&cluster.app_dns)
        .bind(cluster.cluster_type.as_str())
        .bind(cluster.capacity_exhausted)
        .bind(&cluster.sa_token)
        .bind(&cluster.sa_username)
        .bind(cluster.sa_token_encrypted)
        .bind(&cluster.auth_client_id)
        .bind(&cluster.auth_client_secret)
        .bind(&cluster.auth_default_scope)
        .bind(&cluster.token_provider_id)
        .bind(Utc::now())
        .bind(cluster.id.to_string())
        .fetch_optional(executor)
        .await
        .map_err(map_unique_violation("cluster", &cluster.url))?
        .ok_or_else(|| Error::not_found("cluster", cluster.id))?;

    Cluster::try_from(row)
}

async fn delete_cluster<'e>(executor: impl SqliteExecutor<'e>, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM clusters WHERE cluster_id = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

async fn list_clusters<'e>(
    executor: impl SqliteExecutor<'e>,
    cluster_type: Option<ClusterType>,
) -> Result<Vec<Cluster>> {
    let query = format!(
        r#"
        SELECT {} FROM clusters
        WHERE (?1 IS NULL OR cluster_type = ?1)
        ORDER BY url
        "#,
        CLUSTER_COLUMNS
    );

    let rows = sqlx::query_as::<_, ClusterRow>(&query)
        .bind(cluster_type.map(|t| t.as_str()))
        .fetch_all(executor)
        .await?;

    rows_into(rows)
}

async fn create_identity_cluster<'e>(
    executor: impl SqliteExecutor<'e>,
    identity_id: Uuid,
    cluster_id: Uuid,
) -> Result<IdentityCluster> {
    let query = format!(
        r#"
        INSERT INTO identity_clusters (identity_id, cluster_id, created_at)
        VALUES (?, ?, ?)
        RETURNING {}
        "#,
        IDENTITY_CLUSTER_COLUMNS
    );

    let row = sqlx::query_as::<_, IdentityClusterRow>(&query)
        .bind(identity_id.to_string())
        .bind(cluster_id.to_string())
        .bind(Utc::now())
        .fetch_one(executor)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Error::not_found("cluster", cluster_id)
            }
            _ => map_unique_violation(
                "identity cluster",
                format!("{}/{}", identity_id, cluster_id),
            )(err),
        })?;

    IdentityCluster::try_from(row)
}

async fn load_identity_cluster<'e>(
    executor: impl SqliteExecutor<'e>,
    identity_id: Uuid,
    cluster_id: Uuid,
) -> Result<Option<IdentityCluster>> {
    let query = format!(
        "SELECT {} FROM identity_clusters WHERE identity_id = ? AND cluster_id = ?",
        IDENTITY_CLUSTER_COLUMNS
    );

    sqlx::query_as::<_, IdentityClusterRow>(&query)
        .bind(identity_id.to_string())
        .bind(cluster_id.to_string())
        .fetch_optional(executor)
        .await?
        .map(IdentityCluster::try_from)
        .transpose()
}

async fn delete_identity_cluster_by_url<'e>(
    executor: impl SqliteExecutor<'e>,
    identity_id: Uuid,
    cluster_url: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM identity_clusters
        WHERE identity_id = ?
          AND cluster_id IN (SELECT cluster_id FROM clusters WHERE url = ?)
        "#,
    )
    .bind(identity_id.to_string())
    .bind(cluster_url)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

async fn list_identity_clusters<'e>(
    executor: impl SqliteExecutor<'e>,
    identity_id: Uuid,
) -> Result<Vec<IdentityCluster>> {
    let query = format!(
        "SELECT {} FROM identity_clusters WHERE identity_id = ? ORDER BY created_at",
        IDENTITY_CLUSTER_COLUMNS
    );

    let rows = sqlx::query_as::<_, IdentityClusterRow>(&query)
        .bind(identity_id.to_string())
        .fetch_all(executor)
        .await?;

    rows_into(rows)
}

async fn list_clusters_for_identity<'e>(
    executor: impl SqliteExecutor<'e>,
    identity_id: Uuid,
) -> Result<Vec<Cluster>> {
    let rows = sqlx::query_as::<_, ClusterRow>(
        r#"
        SELECT c.cluster_id, c.name, c.url, c.console_url, c.metrics_url, c.logging_url,
               c.app_dns, c.cluster_type, c.capacity_exhausted, c.sa_token, c.sa_username,
               c.sa_token_encrypted, c.auth_client_id, c.auth_client_secret,
               c.auth_default_scope, c.token_provider_id, c.created_at, c.updated_at
        FROM clusters c
        JOIN identity_clusters ic ON ic.cluster_id = c.cluster_id
        WHERE ic.identity_id = ?
        ORDER BY c.url
        "#,
    )
    .bind(identity_id.to_string())
    .fetch_all(executor)
    .await?;

    rows_into(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClusterType;

    fn cluster(url: &str) -> Cluster {
        let now = Utc::now();
        Cluster {
            id: Uuid::new_v4(),
            name: "c1".to_string(),
            url: url.to_string(),
            console_url: "https://console.c1.example.com/console/".to_string(),
            metrics_url: "https://metrics.c1.example.com/".to_string(),
            logging_url: "https://console.c1.example.com/console/".to_string(),
            app_dns: "apps.c1.example.com".to_string(),
            cluster_type: ClusterType::Osd,
            capacity_exhausted: false,
            sa_token: "token".to_string(),
            sa_username: "sa".to_string(),
            sa_token_encrypted: true,
            auth_client_id: "client".to_string(),
            auth_client_secret: "secret".to_string(),
            auth_default_scope: "user:full".to_string(),
            token_provider_id: "tp-1".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_load_cluster() {
        let store = SqliteStore::in_memory().await.unwrap();
        let input = cluster("https://api.c1.example.com/");

        let created = store.create_cluster(&input).await.unwrap();
        assert_eq!(created.id, input.id);
        assert_eq!(created.cluster_type, ClusterType::Osd);

        let by_id = store.load_cluster(input.id).await.unwrap().unwrap();
        let by_url = store
            .load_cluster_by_url("https://api.c1.example.com/")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.id, by_url.id);
        assert_eq!(by_id.token_provider_id, "tp-1");
    }

    #[tokio::test]
    async fn test_duplicate_url_is_conflict() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_cluster(&cluster("https://api.c1.example.com/"))
            .await
            .unwrap();

        let err = store
            .create_cluster(&cluster("https://api.c1.example.com/"))
            .await
            .unwrap_err();
        let Error::AlreadyExists { entity, .. } = err else {
            panic!("expected AlreadyExists, got {err:?}");
        };
        assert_eq!(entity, "cluster");
    }

    #[tokio::test]
    async fn test_save_missing_cluster_is_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store
            .save_cluster(&cluster("https://api.c1.example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "cluster", .. }));
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_writes() {
        let store = SqliteStore::in_memory().await.unwrap();
        let input = cluster("https://api.c1.example.com/");

        let tx = store.begin(IsolationLevel::Default).await.unwrap();
        tx.repository().create_cluster(&input).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(tx.is_closed().await);
        assert!(matches!(
            tx.repository().load_cluster(input.id).await,
            Err(Error::TransactionClosed)
        ));
        assert!(store.load_cluster(input.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_marked_closed_refuses_statements_but_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        let input = cluster("https://api.c1.example.com/");

        let tx = store.begin(IsolationLevel::Default).await.unwrap();
        tx.repository().create_cluster(&input).await.unwrap();
        tx.mark_closed();

        assert!(tx.is_closed().await);
        assert!(matches!(
            tx.repository().load_cluster(input.id).await,
            Err(Error::TransactionClosed)
        ));
        assert!(matches!(
            tx.commit().await,
            Err(Error::TransactionClosed)
        ));


        tx.rollback().await.unwrap();
        assert!(store.load_cluster(input.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_clusters_by_type() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut oso = cluster("https://api.b.example.com/");
        oso.cluster_type = ClusterType::Oso;
        store.create_cluster(&oso).await.unwrap();
        store
            .create_cluster(&cluster("https://api.a.example.com/"))
            .await
            .unwrap();

        let all = store.list_clusters(None).await.unwrap();
        assert_eq!(
            all.iter().map(|c| c.url.as_str()).collect::<Vec<_>>(),
            vec!["https://api.a.example.com/", "https://api.b.example.com/"]
        );

        let only_oso = store.list_clusters(Some(ClusterType::Oso)).await.unwrap();
        assert_eq!(only_oso.len(), 1);
        assert_eq!(only_oso[0].id, oso.id);
    }
}
