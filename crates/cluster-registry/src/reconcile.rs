// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation of stored clusters against the configuration snapshot.
//!
//! Every definition is upserted by API URL inside one transaction. The first
//! failing record aborts the whole sync and the transaction rolls back the
//! records written before it.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::cluster_config::{ClusterConfigSource, ClusterDefinition, ClusterSnapshot};
use crate::context::ServiceContext;
use crate::error::Result;
use crate::store::Repository;
use crate::transaction::TransactionCoordinator;

/// Counts from one sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Clusters inserted.
    pub created: usize,
    /// Existing clusters overwritten from their definition.
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upsert {
    Created,
    Updated,
}

/// Makes stored clusters match a [`ClusterSnapshot`].
#[derive(Clone)]
pub struct ReconciliationService {
    coordinator: TransactionCoordinator,
    source: Arc<ClusterConfigSource>,
}

impl ReconciliationService {
    /// Create a reconciler over a coordinator and config source.
    pub fn new(coordinator: TransactionCoordinator, source: Arc<ClusterConfigSource>) -> Self {
        Self {
            coordinator,
            source,
        }
    }

    /// Upsert every definition of `snapshot` in a transaction on `ctx`.
    ///
    /// When `ctx` is already in a transaction the writes join it, and the
    /// caller decides whether they commit.
    pub async fn sync(
        &self,
        ctx: &mut ServiceContext,
        snapshot: Arc<ClusterSnapshot>,
    ) -> Result<SyncReport> {
        ctx.execute(move |ctx| async move {
            apply_snapshot(&ctx, &snapshot).await
        })
        .await

    }


    /// Sync `snapshot` on a fresh context.
    pub async fn sync_snapshot(&self, snapshot: Arc<ClusterSnapshot>) -> Result<SyncReport> {
        let mut ctx = self.coordinator.context();
        self.sync(&mut ctx, snapshot).await
    }

    /// Sync the config source's current snapshot on a fresh context.
    pub async fn sync_current(&self) -> Result<SyncReport> {
        self.sync_snapshot(self.source.snapshot()).await
    }

    /// The configuration source.
    pub fn source(&self) -> &Arc<ClusterConfigSource> {
        &self.source
    }
}

async fn apply_snapshot(ctx: &ServiceContext, snapshot: &ClusterSnapshot) -> Result<SyncReport> {
    let repository = ctx.repository();
    let mut report = SyncReport::default();

    for definition in snapshot.iter() {
        let outcome = upsert(repository, definition).await.map_err(|e| {
            e.context(format!(
                "sync cluster '{}' ({})",
                definition.name, definition.api_url
            ))
        })?;
        match outcome {
            Upsert::Created => report.created += 1,
            Upsert::Updated => report.updated += 1,
        }
    }

    info!(
        created = report.created,
        updated = report.updated,
        "Synchronized clusters with configuration"
    );
    Ok(report)
}

async fn upsert(repository: &dyn Repository, definition: &ClusterDefinition) -> Result<Upsert> {
    match repository.load_cluster_by_url(&definition.api_url).await? {
        Some(mut cluster) => {
            let token_provider_id = if !definition.token_provider_id.is_empty() {
                definition.token_provider_id.clone()
            } else if !cluster.token_provider_id.is_empty() {
                cluster.token_provider_id.clone()
            } else {
                cluster.id.to_string()
            };
            definition.apply_to(&mut cluster, token_provider_id);
            repository.save_cluster(&cluster).await?;
            debug!(cluster_id = %cluster.id, url = %cluster.url, "Updated cluster");
            Ok(Upsert::Updated)
        }
        None => {
            let id = Uuid::new_v4();
            let token_provider_id = if definition.token_provider_id.is_empty() {
                id.to_string()
            } else {
                definition.token_provider_id.clone()
            };
            let cluster = definition.to_cluster(id, token_provider_id);
            repository.create_cluster(&cluster).await?;
            debug!(cluster_id = %id, url = %cluster.url, "Created cluster");
            Ok(Upsert::Created)
        }
    }
}
