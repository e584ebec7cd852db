// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity to cluster link record.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Grants a user identity association with a cluster.
///
/// Keyed by `(identity_id, cluster_id)`; removed with its cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCluster {
    /// User identity.
    pub identity_id: Uuid,
    /// Linked cluster.
    pub cluster_id: Uuid,
    /// When the link was created.
    pub created_at: DateTime<Utc>,
}
