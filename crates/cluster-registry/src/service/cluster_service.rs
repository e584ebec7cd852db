// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-path cluster operations.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::authz::{Action, Authorizer, Caller};
use crate::cluster_config::default_url_for;
use crate::error::{Error, Result};
use crate::model::{Cluster, ClusterType, parse_cluster_url, with_trailing_slash};
use crate::transaction::TransactionCoordinator;

/// Cluster and identity-link operations called by the API layer.
///
/// Every mutation runs in its own transaction and is authorized first.
/// Reads go straight to the store.
#[derive(Clone)]
pub struct ClusterService {
    coordinator: TransactionCoordinator,
    authorizer: Arc<dyn Authorizer>,
}

impl ClusterService {
    /// Create a service.
    pub fn new(coordinator: TransactionCoordinator, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            coordinator,
            authorizer,
        }
    }

    /// Create the cluster, or overwrite the one with the same API URL.
    ///
    /// Empty auxiliary URLs are derived from the API URL. An existing
    /// cluster keeps its id, and its token provider id unless a new one is
    /// given. A new cluster without a token provider id gets its own id.
    pub async fn create_or_save_cluster(
        &self,
        caller: &Caller,
        mut cluster: Cluster,
    ) -> Result<Cluster> {
        self.authorizer.authorize(caller, Action::SaveCluster)?;
        normalize(&mut cluster)?;

        let saved = self
            .coordinator
            .execute(move |ctx| async move {
                let repository = ctx.repository();
                match repository.load_cluster_by_url(&cluster.url).await? {
                    Some(existing) => {
                        cluster.id = existing.id;
                        if cluster.token_provider_id.is_empty() {
                            cluster.token_provider_id = existing.token_provider_id;
                        }
                        repository.save_cluster(&cluster).await
                    }
                    None => {
                        if cluster.id.is_nil() {
                            cluster.id = Uuid::new_v4();
                        }
                        if cluster.token_provider_id.is_empty() {
                            cluster.token_provider_id = cluster.id.to_string();
                        }
                        repository.create_cluster(&cluster).await
                    }
                }
            })
            .await?;

        info!(cluster_id = %saved.id, url = %saved.url, caller = %caller, "Saved cluster");
        Ok(saved)
    }

    /// Load a cluster by id.
    pub async fn load_cluster(&self, id: Uuid) -> Result<Cluster> {
        self.coordinator
            .context()
            .repository()
            .load_cluster(id)
            .await?
            .ok_or_else(|| Error::not_found("cluster", id))
    }

    /// Load a cluster by API URL; a missing trailing slash is tolerated.
    pub async fn find_by_url(&self, url: &str) -> Result<Cluster> {
        let url = with_trailing_slash(url);
        self.coordinator
            .context()
            .repository()
            .load_cluster_by_url(&url)
            .await?
            .ok_or_else(|| Error::not_found("cluster", url))
    }

    /// List clusters ordered by URL, optionally of one type.
    pub async fn list_clusters(&self, cluster_type: Option<ClusterType>) -> Result<Vec<Cluster>> {
        self.coordinator
            .context()
            .repository()
            .list_clusters(cluster_type)
            .await
    }

    /// Hard-delete a cluster together with its identity links.
    pub async fn delete_cluster(&self, caller: &Caller, id: Uuid) -> Result<()> {
        self.authorizer.authorize(caller, Action::DeleteCluster)?;

        self.coordinator
            .execute(move |ctx| async move {
                if ctx.repository().delete_cluster(id).await? {
                    Ok(())
                } else {
                    Err(Error::not_found("cluster", id))
                }
            })
            .await?;

        info!(cluster_id = %id, caller = %caller, "Deleted cluster");
        Ok(())
    }

    /// Link an identity to the cluster with the given API URL.
    ///
    /// An existing link is an error unless `ignore_if_exists` is set. The
    /// existence check and the insert share one transaction; a concurrent
    /// insert that wins the race still surfaces as [`Error::AlreadyExists`].
    pub async fn link_identity_to_cluster(
        &self,
        caller: &Caller,
        identity_id: Uuid,
        cluster_url: &str,
        ignore_if_exists: bool,
    ) -> Result<()> {
        self.authorizer.authorize(caller, Action::LinkIdentity)?;
        let cluster_url = with_trailing_slash(cluster_url);

        self.coordinator
            .execute(move |ctx| async move {
                let repository = ctx.repository();
                let cluster = repository
                    .load_cluster_by_url(&cluster_url)
                    .await?
                    .ok_or_else(|| Error::not_found("cluster", &cluster_url))?;

                if repository
                    .load_identity_cluster(identity_id, cluster.id)
                    .await?
                    .is_some()
                {
                    return if ignore_if_exists {
                        Ok(())
                    } else {
                        Err(Error::AlreadyExists {
                            entity: "identity cluster",
                            key: format!("{}/{}", identity_id, cluster.id),
                        })
                    };
                }

                repository
                    .create_identity_cluster(identity_id, cluster.id)
                    .await?;
                info!(
                    identity_id = %identity_id,
                    cluster_id = %cluster.id,
                    "Linked identity to cluster"
                );
                Ok(())
            })
            .await
    }

    /// Remove the link between an identity and a cluster.
    ///
    /// Fails with [`Error::NotFound`] and changes nothing when no such link exists.
    pub async fn remove_identity_to_cluster_link(
        &self,
        caller: &Caller,
        identity_id: Uuid,
        cluster_url: &str,
    ) -> Result<()> {
        self.authorizer.authorize(caller, Action::UnlinkIdentity)?;
        let cluster_url = with_trailing_slash(cluster_url);

        self.coordinator
            .execute(move |ctx| async move {
                let deleted = ctx
                    .repository()
                    .delete_identity_cluster_by_url(identity_id, &cluster_url)
                    .await?;
                if deleted == 0 {
                    return Err(Error::not_found(
                        "identity cluster",
                        format!("{} @ {}", identity_id, cluster_url),
                    ));
                }
                info!(
                    identity_id = %identity_id,
                    url = %cluster_url,
                    "Unlinked identity from cluster"
                );
                Ok(())
            })
            .await
    }

    /// Clusters linked to an identity, ordered by URL.
    pub async fn list_clusters_for_identity(&self, identity_id: Uuid) -> Result<Vec<Cluster>> {
        self.coordinator
            .context()
            .repository()
            .list_clusters_for_identity(identity_id)
            .await
    }
}

/// Add trailing slashes, derive empty auxiliary URLs, then validate.
fn normalize(cluster: &mut Cluster) -> Result<()> {
    let api_url = parse_cluster_url(&cluster.url)
        .map_err(|message| Error::bad_parameter("api-url", message))?;
    cluster.url = with_trailing_slash(&cluster.url);

    for (field, value) in [
        ("console-url", &mut cluster.console_url),
        ("metrics-url", &mut cluster.metrics_url),
        ("logging-url", &mut cluster.logging_url),
    ] {
        if value.trim().is_empty() {
            *value = default_url_for(field, &api_url).ok_or_else(|| {
                Error::bad_parameter(field, "cannot be derived from the API URL")
            })?;
        } else {
            *value = with_trailing_slash(value);
        }
    }

    cluster.validate()
}
