// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgExecutor, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
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
    cluster_id::TEXT AS cluster_id, name, url, console_url, metrics_url, logging_url,
    app_dns, cluster_type, capacity_exhausted, sa_token, sa_username, sa_token_encrypted,
    auth_client_id, auth_client_secret, auth_default_scope, token_provider_id,
    created_at, updated_at
"#;

const IDENTITY_CLUSTER_COLUMNS: &str =
    "identity_id::TEXT AS identity_id, cluster_id::TEXT AS cluster_id, created_at";

/// PostgreSQL store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing pool. Migrations are not run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        crate::migrations::run_postgres(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn repository(&self) -> &dyn Repository {
        self
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<Arc<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await?;

        if let Some(level) = isolation.as_sql() {
            sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {}", level))
                .execute(&mut *tx)
                .await?;
        }

        debug!(isolation = %isolation, "Opened postgres transaction");

        Ok(Arc::new(PostgresTransaction {
            tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl Repository for PostgresStore {
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

/// A PostgreSQL transaction shared by every context in one call tree.
pub struct PostgresTransaction {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
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
        let $conn: &mut PgConnection = guard.as_deref_mut().ok_or(Error::TransactionClosed)?;
        $body
    }};
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
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
impl Repository for PostgresTransaction {
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
// Queries (shared by the pool and transaction views)
// ============================================================================

async fn load_cluster<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<Option<Cluster>> {
    let query = format!(
        "SELECT {} FROM clusters WHERE cluster_id = $1",
        CLUSTER_COLUMNS
    );

    sqlx::query_as::<_, ClusterRow>(&query)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .map(Cluster::try_from)
        .transpose()
}

async fn load_cluster_by_url<'e>(
    executor: impl PgExecutor<'e>,
    url: &str,
) -> Result<Option<Cluster>> {
    let query = format!("SELECT {} FROM clusters WHERE url = $1", CLUSTER_COLUMNS);
    sqlx::query_as::<_, ClusterRow>(&query)
        .bind(url)
        .fetch_optional(executor)
        .await?
        .map(Cluster::try_from)
        .transpose()
}

async fn create_cluster<'e>(executor: impl PgExecutor<'e>, cluster: &Cluster) -> Result<Cluster> {
    let query = format!(
        r#"
        INSERT INTO clusters (
            cluster_id, name, url, console_url, metrics_url, logging_url, app_dns,
            cluster_type, capacity_exhausted, sa_token, sa_username, sa_token_encrypted,
            auth_client_id, auth_client_secret, auth_default_scope, token_provider_id,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW(), NOW())
        RETURNING {}
        "#,
        CLUSTER_COLUMNS
    );

    let row = sqlx::query_as::<_, ClusterRow>(&query)
        .bind(cluster.id)
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
        .fetch_one(executor)
        .await
        .map_err(map_unique_violation("cluster", &cluster.url))?;

    Cluster::try_from(row)
}

async fn save_cluster<'e>(executor: impl PgExecutor<'e>, cluster: &Cluster) -> Result<Cluster> {
    let query = format!(
        r#"
        UPDATE clusters
        SET name = $2, url = $3, console_url = $4, metrics_url = $5, logging_url = $6,
            app_dns = $7, cluster_type = $8, capacity_exhausted = $9, sa_token = $10,
            sa_username = $11, sa_token_encrypted = $12, auth_client_id = $13,
            auth_client_secret = $14, auth_default_scope = $15, token_provider_id = $16,
            updated_at = NOW()
        WHERE cluster_id = $1
        RETURNING {}
        "#,
        CLUSTER_COLUMNS
    );

    let row = sqlx::query_as::<_, ClusterRow>(&query)
        .bind(cluster.id)
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
        .fetch_optional(executor)
        .await
        .map_err(map_unique_violation("cluster", &cluster.url))?
        .ok_or_else(|| Error::not_found("cluster", cluster.id))?;

    Cluster::try_from(row)
}

async fn delete_cluster<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<bool> {
    // identity_clusters rows go with the cluster (ON DELETE CASCADE)
    let result = sqlx::query("DELETE FROM clusters WHERE cluster_id = $1")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

async fn list_clusters<'e>(
    executor: impl PgExecutor<'e>,
    cluster_type: Option<ClusterType>,
) -> Result<Vec<Cluster>> {
    let query = format!(
        r#"
        SELECT {} FROM clusters
        WHERE ($1::TEXT IS NULL OR cluster_type = $1)
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
    executor: impl PgExecutor<'e>,
    identity_id: Uuid,
    cluster_id: Uuid,
) -> Result<IdentityCluster> {
    let query = format!(
        r#"
        INSERT INTO identity_clusters (identity_id, cluster_id, created_at)
        VALUES ($1, $2, NOW())
        RETURNING {}
        "#,
        IDENTITY_CLUSTER_COLUMNS
    );

    let row = sqlx::query_as::<_, IdentityClusterRow>(&query)
        .bind(identity_id)
        .bind(cluster_id)
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
    executor: impl PgExecutor<'e>,
    identity_id: Uuid,
    cluster_id: Uuid,
) -> Result<Option<IdentityCluster>> {
    let query = format!(
        "SELECT {} FROM identity_clusters WHERE identity_id = $1 AND cluster_id = $2",
        IDENTITY_CLUSTER_COLUMNS
    );

    sqlx::query_as::<_, IdentityClusterRow>(&query)
        .bind(identity_id)
        .bind(cluster_id)
        .fetch_optional(executor)
        .await?
        .map(IdentityCluster::try_from)
        .transpose()
}

async fn delete_identity_cluster_by_url<'e>(
    executor: impl PgExecutor<'e>,
    identity_id: Uuid,
    cluster_url: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM identity_clusters
        WHERE identity_id = $1
          AND cluster_id IN (SELECT cluster_id FROM clusters WHERE url = $2)
        "#,
    )
    .bind(identity_id)
    .bind(cluster_url)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

async fn list_identity_clusters<'e>(
    executor: impl PgExecutor<'e>,
    identity_id: Uuid,
) -> Result<Vec<IdentityCluster>> {
    let query = format!(
        "SELECT {} FROM identity_clusters WHERE identity_id = $1 ORDER BY created_at",
        IDENTITY_CLUSTER_COLUMNS
    );

    let rows = sqlx::query_as::<_, IdentityClusterRow>(&query)
        .bind(identity_id)
        .fetch_all(executor)
        .await?;

    rows_into(rows)
}

async fn list_clusters_for_identity<'e>(
    executor: impl PgExecutor<'e>,
    identity_id: Uuid,
) -> Result<Vec<Cluster>> {
    let rows = sqlx::query_as::<_, ClusterRow>(
        r#"
        SELECT c.cluster_id::TEXT AS cluster_id, c.name, c.url, c.console_url, c.metrics_url,
               c.logging_url, c.app_dns, c.cluster_type, c.capacity_exhausted, c.sa_token,
               c.sa_username, c.sa_token_encrypted, c.auth_client_id, c.auth_client_secret,
               c.auth_default_scope, c.token_provider_id, c.created_at, c.updated_at
        FROM clusters c
        JOIN identity_clusters ic ON ic.cluster_id = c.cluster_id
        WHERE ic.identity_id = $1
        ORDER BY c.url
        "#,
    )
    .bind(identity_id)
    .fetch_all(executor)
    .await?;

    rows_into(rows)
}
