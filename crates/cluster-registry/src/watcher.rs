// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background watcher that hot-reloads the cluster configuration file.
//!
//! The watcher subscribes to the file's parent directory and reacts to
//! create, modify and remove events for the file name:
//! 1. Events arriving within `debounce` of each other are handled once
//! 2. After a remove it waits `rewatch_delay` and re-subscribes, so editors
//!    that replace files by remove + create are tolerated
//! 3. The config source reloads; on success the new snapshot is synced
//!
//! Reload and sync failures are logged and the previous snapshot stays
//! current. Errors from the watch subsystem are logged and watching continues.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cluster_config::ClusterConfigSource;
use crate::error::{Error, Result};
use crate::reconcile::ReconciliationService;

/// Configuration for the config watcher.
#[derive(Debug, Clone)]
pub struct ConfigWatcherConfig {
    /// Delay before re-subscribing after the file was removed.
    pub rewatch_delay: Duration,
    /// Window for coalescing bursts of events into one reload.
    pub debounce: Duration,
}

impl Default for ConfigWatcherConfig {
    fn default() -> Self {
        Self {
            rewatch_delay: Duration::from_millis(100),
            debounce: Duration::from_millis(50),
        }
    }
}

/// Starts the background reload loop.
pub struct ConfigWatcher;

impl ConfigWatcher {
    /// Subscribe to the config file and spawn the reload loop.
    ///
    /// Must be called from within a tokio runtime. Fails only if the initial
    /// subscription cannot be established.
    pub fn start(
        source: Arc<ClusterConfigSource>,
        reconciler: ReconciliationService,
        config: ConfigWatcherConfig,
    ) -> Result<WatcherHandle> {
        let path = source.path().to_path_buf();
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| {
                Error::bad_parameter("config-file", "path has no file name")
            })?;
        let dir = watch_dir(&path);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            // Receiver gone means the loop has exited.
            let _ = events_tx.send(event);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let shutdown = Arc::new(Notify::new());
        let (reloads_tx, reloads_rx) = watch::channel(0u64);

        let worker = WatchLoop {
            watcher,
            dir,
            file_name,
            events: events_rx,
            source,
            reconciler,
            config,
            shutdown: shutdown.clone(),
            reloads: reloads_tx,
        };

        info!(path = %path.display(), "Config watcher started");
        let task = tokio::spawn(worker.run());

        Ok(WatcherHandle {
            shutdown,
            task: Some(task),
            reloads: reloads_rx,
        })
    }
}

/// Handle to a running watcher. Stops it on [`stop`](Self::stop) or drop.
pub struct WatcherHandle {
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    reloads: watch::Receiver<u64>,
}

impl WatcherHandle {
    /// Number of completed reload + sync cycles.
    pub fn reloads(&self) -> watch::Receiver<u64> {
        self.reloads.clone()
    }

    /// Stop watching and wait for the loop to exit.
    pub async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Config watcher task ended abnormally");
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shutdown.notify_one();
        }
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

struct WatchLoop {
    watcher: RecommendedWatcher,
    dir: PathBuf,
    file_name: OsString,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    source: Arc<ClusterConfigSource>,
    reconciler: ReconciliationService,
    config: ConfigWatcherConfig,
    shutdown: Arc<Notify>,
    reloads: watch::Sender<u64>,
}

/// What a burst of events asks for.
#[derive(Debug, Default, PartialEq, Eq)]
struct Batch {
    changed: bool,
    removed: bool,
}

impl WatchLoop {
    async fn run(mut self) {
        loop {
            let first = tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Config watcher received shutdown signal");
                    break;
                }

                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("Config watcher event channel closed");
                        break;
                    }
                },
            };

            tokio::time::sleep(self.config.debounce).await;
            let mut burst = vec![first];
            while let Ok(event) = self.events.try_recv() {
                burst.push(event);
            }

            let batch = classify(burst, &self.file_name);
            if !batch.changed {
                continue;
            }
            if batch.removed {
                tokio::time::sleep(self.config.rewatch_delay).await;
                self.rewatch();
            }
            reload_and_sync(&self.source, &self.reconciler, &self.reloads).await;
        }

        info!("Config watcher stopped");
    }

    fn rewatch(&mut self) {
        if let Err(e) = self.watcher.unwatch(&self.dir) {
            debug!(error = %e, "Unwatch before re-subscribe failed");
        }
        match self.watcher.watch(&self.dir, RecursiveMode::NonRecursive) {
            Ok(()) => debug!(dir = %self.dir.display(), "Re-subscribed to config directory"),
            Err(e) => error!(
                error = %e,
                dir = %self.dir.display(),
                "Failed to re-subscribe to config directory"
            ),
        }
    }
}

/// Reload the file and, when it validates, sync the new snapshot.
async fn reload_and_sync(
    source: &ClusterConfigSource,
    reconciler: &ReconciliationService,
    reloads: &watch::Sender<u64>,
) {
    let snapshot = match source.reload() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(
                error = %e,
                path = %source.path().display(),
                "Cluster configuration reload failed, keeping previous snapshot"
            );
            return;
        }
    };

    match reconciler.sync_snapshot(snapshot).await {
        Ok(report) => {
            reloads.send_modify(|count| *count += 1);
            info!(
                created = report.created,
                updated = report.updated,
                "Applied reloaded cluster configuration"
            );
        }
        Err(e) => error!(error = %e, "Failed to sync reloaded cluster configuration"),
    }
}

fn classify(burst: Vec<notify::Result<Event>>, file_name: &OsString) -> Batch {
    let mut batch = Batch::default();
    for event in burst {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "File watch error");
                continue;
            }
        };
        if !concerns_file(&event, file_name) {
            continue;
        }
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => batch.changed = true,
            EventKind::Remove(_) => {
                batch.changed = true;
                batch.removed = true;
            }
            _ => {}
        }
    }
    batch
}

fn concerns_file(event: &Event, file_name: &OsString) -> bool {
    event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()))
}
