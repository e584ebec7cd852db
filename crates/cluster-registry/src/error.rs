// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the cluster registry.

use std::time::Duration;

use thiserror::Error;

/// Broad error categories surfaced to callers (API layers map these to status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input.
    BadParameter,
    /// The requested record does not exist.
    NotFound,
    /// The caller lacks the capability for the operation.
    Unauthorized,
    /// The write collides with an existing record.
    Conflict,
    /// Transaction, storage or other internal failure.
    Internal,
    /// The cluster configuration file or process configuration is invalid.
    Config,
}

/// Cluster registry errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Input validation failed.
    #[error("Bad parameter '{field}': {message}")]
    BadParameter {
        /// The offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A lookup found nothing.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of record ("cluster", "identity cluster").
        entity: &'static str,
        /// Key used for the lookup.
        key: String,
    },

    /// The record already exists.
    #[error("{entity} already exists: {key}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Conflicting key.
        key: String,
    },

    /// The caller is not allowed to perform the operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The unit of work did not finish before the transaction deadline.
    #[error("Transaction timeout: unit of work exceeded {timeout:?}")]
    TransactionTimeout {
        /// The configured deadline.
        timeout: Duration,
    },

    /// The transaction was already committed, rolled back or abandoned.
    #[error("Transaction is closed")]
    TransactionClosed,

    /// The unit of work panicked.
    #[error("Unit of work panicked: {message}")]
    Panic {
        /// Panic payload rendered as text.
        message: String,
    },

    /// Committing the transaction failed.
    #[error("Commit failed: {0}")]
    Commit(#[source] sqlx::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Running migrations failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Cluster configuration file could not be loaded.
    #[error("Cluster configuration error: {0}")]
    ClusterConfig(#[from] crate::cluster_config::ClusterConfigError),

    /// Process configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Filesystem watch could not be established.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// An operation failed; `context` names the record and step.
    #[error("{context}: {source}")]
    Context {
        /// Which record/operation failed.
        context: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadParameter { .. } => ErrorKind::BadParameter,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::ClusterConfig(_) | Self::Config(_) => ErrorKind::Config,
            Self::Context { source, .. } => source.kind(),
            Self::TransactionTimeout { .. }
            | Self::TransactionClosed
            | Self::Panic { .. }
            | Self::Commit(_)
            | Self::Database(_)
            | Self::Migrate(_)
            | Self::Watch(_)
            | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a [`Error::BadParameter`].
    pub fn bad_parameter(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadParameter {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Wrap this error with the record/operation it happened in.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any [`Error::Context`] layers.
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type using the registry [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
