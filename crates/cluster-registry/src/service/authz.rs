// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authorization of mutating requests.
//!
//! Callers are identified by the token layer in front of the registry; this
//! module only decides whether an identified caller may perform an action.

use std::collections::HashSet;
use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// Another service, by service account name.
    ServiceAccount(String),
    /// An end user, by identity id.
    User(Uuid),
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount(name) => write!(f, "service account '{}'", name),
            Self::User(id) => write!(f, "user {}", id),
        }
    }
}

/// Mutating operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create or overwrite a cluster.
    SaveCluster,
    /// Hard-delete a cluster.
    DeleteCluster,
    /// Link an identity to a cluster.
    LinkIdentity,
    /// Remove an identity link.
    UnlinkIdentity,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SaveCluster => "save cluster",
            Self::DeleteCluster => "delete cluster",
            Self::LinkIdentity => "link identity",
            Self::UnlinkIdentity => "unlink identity",
        })
    }
}

/// Decides whether a caller may perform an action.
pub trait Authorizer: Send + Sync {
    /// `Ok(())` when allowed, [`Error::Unauthorized`] otherwise.
    fn authorize(&self, caller: &Caller, action: Action) -> Result<()>;
}

/// Allows everything. For embedded use and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _caller: &Caller, _action: Action) -> Result<()> {
        Ok(())
    }
}

/// Allows only the listed service accounts.
#[derive(Debug, Clone)]
pub struct ServiceAccountAllowList {
    accounts: HashSet<String>,
}

impl ServiceAccountAllowList {
    /// Create an allow-list.
    pub fn new(accounts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for ServiceAccountAllowList {
    fn authorize(&self, caller: &Caller, action: Action) -> Result<()> {
        match caller {
            Caller::ServiceAccount(name) if self.accounts.contains(name) => Ok(()),
            _ => Err(Error::Unauthorized(format!(
                "{} may not {}",
                caller, action
            ))),
        }
    }
}
