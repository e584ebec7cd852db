// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process configuration loaded from environment variables.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::IsolationLevel;

/// Default transaction deadline (5 minutes).
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Cluster registry configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Maximum pooled database connections
    pub max_connections: u32,
    /// Path of the JSON cluster definitions file
    pub cluster_config_file: PathBuf,
    /// Deadline for a single unit of work inside a transaction
    pub transaction_timeout: Duration,
    /// Isolation level for new transactions
    pub isolation_level: IsolationLevel,
    /// Whether to hot-reload the cluster definitions file
    pub watch_cluster_config: bool,
    /// Service accounts allowed to mutate clusters and links; `None` allows everyone
    pub authorized_service_accounts: Option<HashSet<String>>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CLUSTER_REGISTRY_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `CLUSTER_REGISTRY_CONFIG_FILE`: cluster definitions (default: clusters.conf.json)
    /// - `CLUSTER_REGISTRY_TRANSACTION_TIMEOUT_SECS`: transaction deadline (default: 300)
    /// - `CLUSTER_REGISTRY_ISOLATION_LEVEL`: default, read-committed, repeatable-read, serializable
    /// - `CLUSTER_REGISTRY_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `CLUSTER_REGISTRY_WATCH_CONFIG`: hot-reload the definitions file (default: true)
    /// - `CLUSTER_REGISTRY_SERVICE_ACCOUNTS`: comma-separated allow-list (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CLUSTER_REGISTRY_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("CLUSTER_REGISTRY_DATABASE_URL"))?;

        let cluster_config_file = PathBuf::from(
            std::env::var("CLUSTER_REGISTRY_CONFIG_FILE")
                .unwrap_or_else(|_| "clusters.conf.json".to_string()),
        );

        let transaction_timeout = match std::env::var("CLUSTER_REGISTRY_TRANSACTION_TIMEOUT_SECS") {
            Ok(value) => value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::Invalid(
                    "CLUSTER_REGISTRY_TRANSACTION_TIMEOUT_SECS",
                    "must be a positive number of seconds",
                ))?,
            Err(_) => DEFAULT_TRANSACTION_TIMEOUT,
        };

        let isolation_level = std::env::var("CLUSTER_REGISTRY_ISOLATION_LEVEL")
            .unwrap_or_default()
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "CLUSTER_REGISTRY_ISOLATION_LEVEL",
                    "must be default, read-committed, repeatable-read or serializable",
                )
            })?;

        let max_connections = std::env::var("CLUSTER_REGISTRY_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .ok()
            .filter(|max| *max > 0)
            .ok_or(ConfigError::Invalid(
                "CLUSTER_REGISTRY_MAX_CONNECTIONS",
                "must be a positive integer",
            ))?;

        let watch_cluster_config = std::env::var("CLUSTER_REGISTRY_WATCH_CONFIG")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let authorized_service_accounts = std::env::var("CLUSTER_REGISTRY_SERVICE_ACCOUNTS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect::<HashSet<_>>()
            })
            .filter(|names| !names.is_empty());

        Ok(Self {
            database_url,
            max_connections,
            cluster_config_file,
            transaction_timeout,
            isolation_level,
            watch_cluster_config,
            authorized_service_accounts,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 7] = [
        "CLUSTER_REGISTRY_DATABASE_URL",
        "CLUSTER_REGISTRY_CONFIG_FILE",
        "CLUSTER_REGISTRY_TRANSACTION_TIMEOUT_SECS",
        "CLUSTER_REGISTRY_ISOLATION_LEVEL",
        "CLUSTER_REGISTRY_MAX_CONNECTIONS",
        "CLUSTER_REGISTRY_WATCH_CONFIG",
        "CLUSTER_REGISTRY_SERVICE_ACCOUNTS",
    ];

    /// Restores the registry variables when dropped.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = VARS.iter().map(|k| (*k, env::var(k).ok())).collect();
            for key in VARS {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe { env::remove_var(key) };
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(key, v),
                        None => env::remove_var(key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let guard = EnvGuard::clean();
        guard.set("CLUSTER_REGISTRY_DATABASE_URL", "sqlite::memory:");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(
            config.cluster_config_file,
            PathBuf::from("clusters.conf.json")
        );
        assert_eq!(config.transaction_timeout, DEFAULT_TRANSACTION_TIMEOUT);
        assert_eq!(config.isolation_level, IsolationLevel::Default);
        assert_eq!(config.max_connections, 10);
        assert!(config.watch_cluster_config);
        assert!(config.authorized_service_accounts.is_none());
    }

    #[test]
    fn test_config_from_env_with_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let guard = EnvGuard::clean();
        guard.set(
            "CLUSTER_REGISTRY_DATABASE_URL",
            "postgres://localhost/clusters",
        );
        guard.set(
            "CLUSTER_REGISTRY_CONFIG_FILE",
            "/etc/registry/clusters.json",
        );
        guard.set("CLUSTER_REGISTRY_TRANSACTION_TIMEOUT_SECS", "30");
        guard.set("CLUSTER_REGISTRY_ISOLATION_LEVEL", "serializable");
        guard.set("CLUSTER_REGISTRY_WATCH_CONFIG", "false");
        guard.set("CLUSTER_REGISTRY_SERVICE_ACCOUNTS", "tenant, auth ,,");

        let config = Config::from_env().unwrap();

        assert_eq!(config.transaction_timeout, Duration::from_secs(30));
        assert_eq!(config.isolation_level, IsolationLevel::Serializable);
        assert!(!config.watch_cluster_config);
        let accounts = config.authorized_service_accounts.unwrap();
        assert_eq!(accounts.len(), 2);
        assert!(accounts.contains("tenant"));
        assert!(accounts.contains("auth"));
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing("CLUSTER_REGISTRY_DATABASE_URL")
        ));
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let guard = EnvGuard::clean();
        guard.set("CLUSTER_REGISTRY_DATABASE_URL", "sqlite::memory:");
        guard.set("CLUSTER_REGISTRY_TRANSACTION_TIMEOUT_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("CLUSTER_REGISTRY_TRANSACTION_TIMEOUT_SECS", _)
        ));
    }

    #[test]
    fn test_config_rejects_zero_max_connections() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let guard = EnvGuard::clean();
        guard.set("CLUSTER_REGISTRY_DATABASE_URL", "sqlite::memory:");
        guard.set("CLUSTER_REGISTRY_MAX_CONNECTIONS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("CLUSTER_REGISTRY_MAX_CONNECTIONS", _)
        ));
    }
}
