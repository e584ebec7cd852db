// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-path operations on clusters and identity links.

mod authz;
mod cluster_service;

pub use authz::{Action, AllowAll, Authorizer, Caller, ServiceAccountAllowList};
pub use cluster_service::ClusterService;
