// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster definitions loaded from the JSON configuration file.
//!
//! The file holds either `{"clusters": [ ... ]}` or a bare array of records:
//!
//! ```json
//! {
//!   "clusters": [
//!     {
//!       "name": "us-east-2",
//!       "api-url": "https://api.us-east-2.example.com",
//!       "app-dns": "8a09.apps.example.com",
//!       "service-account-token": "...",
//!       "service-account-username": "registry-sa",
//!       "auth-client-id": "registry",
//!       "auth-client-secret": "...",
//!       "auth-client-default-scope": "user:full"
//!     }
//!   ]
//! }
//! ```
//!
//! Loading runs in three steps: kind checks on the raw JSON, default
//! injection for absent keys ([`FIELD_DEFAULTS`]), then value checks. Issues
//! from every record are collected and reported together as
//! [`ClusterConfigError::Invalid`].
//!
//! [`ClusterConfigSource`] keeps the last good [`ClusterSnapshot`]. A failed
//! reload leaves it in place.

mod defaults;
mod definition;
mod validation;

pub use defaults::{DefaultValue, FIELD_DEFAULTS, apply_defaults, default_url_for, derive_url};
pub use definition::ClusterDefinition;
pub use validation::{FIELDS, FieldKind, FieldSpec, URL_FIELDS, ValidationIssue, field_spec};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::info;

use crate::model::with_trailing_slash;

/// Errors loading the cluster configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ClusterConfigError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("malformed cluster configuration: {0}")]
    Parse(#[source] serde_json::Error),

    /// One or more records failed validation.
    #[error("invalid cluster configuration: {}", validation::render_issues(.0))]
    Invalid(Vec<ValidationIssue>),
}

impl ClusterConfigError {
    /// Validation issues, if this is a validation failure.
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Invalid(issues) => issues,
            _ => &[],
        }
    }
}

/// An immutable set of cluster definitions keyed by API URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    clusters: BTreeMap<String, ClusterDefinition>,
}

impl ClusterSnapshot {
    /// Parse, default and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ClusterConfigError> {
        let document: Value = serde_json::from_str(text).map_err(ClusterConfigError::Parse)?;
        Ok(Self::from_definitions(parse_definitions(document)?))
    }

    /// Build a snapshot from already validated definitions.
    pub fn from_definitions(definitions: impl IntoIterator<Item = ClusterDefinition>) -> Self {
        let clusters = definitions
            .into_iter()
            .map(|definition| (definition.api_url.clone(), definition))
            .collect();
        Self { clusters }
    }

    /// Definition for an API URL (with or without trailing slash).
    pub fn get(&self, api_url: &str) -> Option<&ClusterDefinition> {
        self.clusters.get(&with_trailing_slash(api_url))
    }

    /// Definitions ordered by API URL.
    pub fn iter(&self) -> impl Iterator<Item = &ClusterDefinition> {
        self.clusters.values()
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether the snapshot holds no definitions.
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

fn parse_definitions(document: Value) -> Result<Vec<ClusterDefinition>, ClusterConfigError> {
    let records = match document {
        Value::Array(records) => records,
        Value::Object(mut root) => match root.remove("clusters") {
            Some(Value::Array(records)) => records,
            _ => {
                return Err(ClusterConfigError::Invalid(vec![ValidationIssue::file(
                    "expected a 'clusters' array",
                )]));
            }
        },
        _ => {
            return Err(ClusterConfigError::Invalid(vec![ValidationIssue::file(
                "expected an object with a 'clusters' array",
            )]));
        }
    };

    let mut issues = Vec::new();
    if records.is_empty() {
        issues.push(ValidationIssue::file("no clusters defined"));
    }

    let mut prepared: Vec<(usize, Map<String, Value>)> = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let Value::Object(mut record) = record else {
            issues.push(ValidationIssue {
                record: Some(index),
                name: None,
                field: None,
                message: "expected an object".to_string(),
            });
            continue;
        };
        validation::check_types(index, &record, &mut issues);
        apply_defaults(&mut record);
        validation::check_values(index, &record, &mut issues);
        prepared.push((index, record));
    }
    validation::check_duplicate_urls(&prepared, &mut issues);

    if !issues.is_empty() {
        return Err(ClusterConfigError::Invalid(issues));
    }

    prepared
        .into_iter()
        .map(|(_, record)| {
            serde_json::from_value(Value::Object(record)).map_err(ClusterConfigError::Parse)
        })
        .collect()
}

/// Read and validate a configuration file.
pub fn read_snapshot(path: &Path) -> Result<ClusterSnapshot, ClusterConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ClusterConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ClusterSnapshot::from_json(&text)
}

/// The configuration file plus its last successfully loaded snapshot.
#[derive(Debug)]
pub struct ClusterConfigSource {
    path: PathBuf,
    snapshot: RwLock<Arc<ClusterSnapshot>>,
}

impl ClusterConfigSource {
    /// Load the file. Fails if it cannot be read or does not validate.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ClusterConfigError> {
        let path = path.into();
        let snapshot = read_snapshot(&path)?;
        info!(
            path = %path.display(),
            clusters = snapshot.len(),
            "Loaded cluster configuration"
        );
        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Re-read the file and install the new snapshot.
    ///
    /// Parsing and validation happen before the write lock is taken. On error
    /// the previous snapshot stays current.
    pub fn reload(&self) -> Result<Arc<ClusterSnapshot>, ClusterConfigError> {
        let snapshot = Arc::new(read_snapshot(&self.path)?);
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot.clone();

        info!(
            path = %self.path.display(),
            clusters = snapshot.len(),
            "Reloaded cluster configuration"
        );
        Ok(snapshot)
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Path of the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
