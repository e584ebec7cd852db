// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry records.

mod cluster;
mod identity_cluster;

pub use cluster::{Cluster, ClusterType, parse_cluster_url, with_trailing_slash};
pub use identity_cluster::IdentityCluster;
