//! Composition root wiring storage, connectivity and the sync queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::network::{ConnectivityProbe, NetworkMonitor};
use crate::storage::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
use crate::sync::SyncQueue;
use crate::Result;

/// Owns the sync queue, the network monitor and their background tasks.
///
/// Background tasks are aborted when the runtime is dropped.
pub struct SyncRuntime {
    queue: SyncQueue,
    network: NetworkMonitor,
    db_path: Option<PathBuf>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncRuntime {
    /// Open the on-disk queue and start watching connectivity.
    ///
    /// `default_db_path` is used when the config does not name a database.
    /// Starts the connectivity probe when one is configured; without a probe
    /// the host reports connectivity through [`SyncRuntime::network`].
    /// Must be called from within a tokio runtime.
    pub fn open(config: &AppConfig, default_db_path: &Path) -> Result<Self> {
        let mut runtime = Self::open_offline(config, default_db_path)?;

        if let Some(handle) = runtime.queue.watch_network() {
            runtime.tasks.push(handle);
        }
        if let Some(probe_config) = config.connectivity_probe.clone() {
            let probe = ConnectivityProbe::new(probe_config, runtime.network.clone())?;
            runtime.tasks.extend(probe.spawn());
        }

        Ok(runtime)
    }

    /// Open the on-disk queue with the network reported offline and no
    /// background tasks, for inspecting or editing the queue.
    pub fn open_offline(config: &AppConfig, default_db_path: &Path) -> Result<Self> {
        let db_path = config
            .database_path
            .clone()
            .unwrap_or_else(|| default_db_path.to_path_buf());
        let store = SqliteKeyValueStore::open(&db_path)?;
        tracing::debug!("Sync queue storage at {}", db_path.display());

        let mut runtime = Self::with_store(Arc::new(store), config, NetworkMonitor::new(false));
        runtime.db_path = Some(db_path);
        Ok(runtime)
    }

    /// Build the same graph over in-memory storage (primarily for tests).
    pub fn in_memory(config: &AppConfig, connected: bool) -> Self {
        let runtime = Self::with_store(
            Arc::new(MemoryKeyValueStore::new()),
            config,
            NetworkMonitor::new(connected),
        );
        runtime.start_network_watch()
    }

    fn with_store(
        store: Arc<dyn KeyValueStore>,
        config: &AppConfig,
        network: NetworkMonitor,
    ) -> Self {
        let queue = SyncQueue::new(store, network.clone(), &config.sync_queue);
        Self {
            queue,
            network,
            db_path: None,
            tasks: Vec::new(),
        }
    }

    fn start_network_watch(mut self) -> Self {
        if let Some(handle) = self.queue.watch_network() {
            self.tasks.push(handle);
        }
        self
    }

    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub const fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Database file backing the queue, `None` for in-memory runtimes.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Stop background tasks.
    pub fn shutdown(mut self) {
        self.abort_tasks();
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SyncRuntime {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
