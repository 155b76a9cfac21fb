//! Offline mutation queue.
//!
//! Operations are appended in enqueue order, persisted as one JSON array under
//! a single storage key, and replayed one at a time when the network is up.
//! A pass works on a snapshot taken when it starts; anything enqueued while it
//! runs waits for the next pass.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;

use super::handler::{EntityHandler, HandlerRegistry};
use super::listeners::{Listeners, Snapshot, Subscription};
use super::stats::{PassReport, QueueStats};
use crate::config::SyncQueueConfig;
use crate::error::Result;
use crate::models::{EntityType, OperationId, OperationType, SyncOperation};
use crate::network::NetworkMonitor;
use crate::state::SyncState;
use crate::storage::KeyValueStore;

/// Cheaply cloneable handle to a shared sync queue.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<Inner>,
}

struct Inner {
    operations: Mutex<Vec<SyncOperation>>,
    handlers: RwLock<HandlerRegistry>,
    listeners: Listeners,
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    network: NetworkMonitor,
    max_retries: AtomicU32,
    revision: AtomicU64,
    processing: AtomicBool,
    watching_network: AtomicBool,
}

/// Clears the in-flight flag when a pass ends, including by cancellation.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncQueue {
    /// Build a queue over `store`, restoring whatever was persisted under the
    /// configured key.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        network: NetworkMonitor,
        config: &SyncQueueConfig,
    ) -> Self {
        let operations = load_persisted(store.as_ref(), &config.storage_key);
        if !operations.is_empty() {
            tracing::info!(
                "Restored {} pending sync operations from storage",
                operations.len()
            );
        }

        Self {
            inner: Arc::new(Inner {
                operations: Mutex::new(operations),
                handlers: RwLock::new(HandlerRegistry::new()),
                listeners: Listeners::default(),
                store,
                storage_key: config.storage_key.clone(),
                network,
                max_retries: AtomicU32::new(config.max_retries),
                revision: AtomicU64::new(0),
                processing: AtomicBool::new(false),
                watching_network: AtomicBool::new(false),
            }),
        }
    }

    /// Queue a mutation and return its id.
    ///
    /// Never fails: persistence errors are logged and the operation stays in
    /// memory. When the network is up a pass is scheduled on the current tokio
    /// runtime without waiting for it.
    pub fn enqueue(
        &self,
        entity_type: EntityType,
        operation_type: OperationType,
        data: serde_json::Value,
        entity_id: Option<String>,
    ) -> OperationId {
        let operation = SyncOperation::new(entity_type, operation_type, data, entity_id);
        let id = operation.id;

        let snapshot = self.mutate(|operations| operations.push(operation)).1;
        tracing::debug!(
            "Queued {operation_type} {entity_type} as {id} ({} pending)",
            snapshot.operations.len()
        );
        self.inner.listeners.notify(snapshot);

        if self.inner.network.is_connected() {
            self.schedule_pass();
        }
        id
    }

    /// Run one pass over the queue.
    ///
    /// Returns `None` without doing anything when the network is down or
    /// another pass is already running.
    pub async fn process_queue(&self) -> Option<PassReport> {
        if !self.inner.network.is_connected() {
            tracing::debug!("Skipping sync pass: network is offline");
            return None;
        }
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Skipping sync pass: another pass is in flight");
            return None;
        }
        let guard = PassGuard(&self.inner.processing);

        let snapshot = self.get_queue();
        let mut report = PassReport::default();
        if snapshot.is_empty() {
            return Some(report);
        }

        let max_retries = self.max_retries();
        tracing::debug!("Starting sync pass over {} operations", snapshot.len());

        for queued in snapshot {
            let Some(handler) = self.handler_for(queued.entity_type) else {
                tracing::warn!(
                    "No handler registered for {}; dropping operation {}",
                    queued.entity_type,
                    queued.id
                );
                if self.take(queued.id).is_some() {
                    report.dropped_unhandled += 1;
                } else {
                    report.skipped += 1;
                }
                continue;
            };

            let Some(attempt) = self.record_attempt(queued.id) else {
                report.skipped += 1;
                continue;
            };
            report.attempted += 1;

            let applied = match handler.apply(&attempt).await {
                Ok(applied) => applied,
                Err(error) => {
                    tracing::error!(
                        "Handler for {} failed on operation {} (attempt {}): {}",
                        attempt.entity_type,
                        attempt.id,
                        attempt.retry_count,
                        error
                    );
                    false
                }
            };

            if applied {
                self.take(attempt.id);
                report.succeeded += 1;
            } else if attempt.is_exhausted(max_retries) {
                tracing::warn!(
                    "Dropping {} {} operation {} after {} failed attempts",
                    attempt.operation_type,
                    attempt.entity_type,
                    attempt.id,
                    attempt.retry_count
                );
                self.take(attempt.id);
                report.dropped_exhausted += 1;
            } else {
                tracing::debug!(
                    "Operation {} not applied (attempt {} of {}); keeping it queued",
                    attempt.id,
                    attempt.retry_count,
                    max_retries
                );
                report.retained += 1;
            }
        }

        let snapshot = self.mutate_in_pass(|_| ()).1;
        tracing::info!(
            "Sync pass finished: {} applied, {} kept for retry, {} dropped, {} pending",
            report.succeeded,
            report.retained,
            report.dropped_exhausted + report.dropped_unhandled,
            snapshot.operations.len()
        );
        // Listeners must see the pass as finished.
        drop(guard);
        self.inner.listeners.notify(snapshot);
        Some(report)
    }

    /// Register the handler for an entity type, replacing any previous one.
    pub fn register_handler<H>(&self, entity_type: EntityType, handler: H)
    where
        H: EntityHandler + 'static,
    {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.register(entity_type, Arc::new(handler)).is_some() {
            tracing::debug!("Replaced sync handler for {entity_type}");
        }
    }

    /// Cancel a pending operation. Returns whether it was still queued.
    pub fn remove_from_queue(&self, id: OperationId) -> bool {
        let (removed, snapshot) = self.mutate(|operations| remove_by_id(operations, id));
        if removed.is_some() {
            tracing::debug!("Removed operation {id} from sync queue");
            self.inner.listeners.notify(snapshot);
        }
        removed.is_some()
    }

    /// Snapshot copy of the queue in enqueue order.
    pub fn get_queue(&self) -> Vec<SyncOperation> {
        self.operations().clone()
    }

    pub fn len(&self) -> usize {
        self.operations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations().is_empty()
    }

    /// Subscribe to full snapshots after every enqueue, removal, clear and pass.
    pub fn add_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[SyncOperation]) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(callback))
    }

    pub fn set_max_retries(&self, count: u32) {
        self.inner.max_retries.store(count, Ordering::Release);
    }

    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        QueueStats::collect(&self.operations(), self.max_retries(), self.is_processing())
    }

    /// State for the pending-changes indicator.
    pub fn sync_state(&self) -> SyncState {
        SyncState::derive(
            self.inner.network.is_connected(),
            self.is_processing(),
            self.len(),
        )
    }

    /// Drop every pending operation.
    pub fn clear_queue(&self) {
        let (cleared, snapshot) = self.mutate(|operations| {
            let cleared = operations.len();
            operations.clear();
            cleared
        });
        tracing::info!("Cleared {cleared} operations from sync queue");
        self.inner.listeners.notify(snapshot);
    }

    /// Subscribe to the network monitor: each transition to connected with a
    /// non-empty queue schedules a pass.
    ///
    /// Only the first call subscribes; later calls return `None`, as does a
    /// call made outside a tokio runtime.
    pub fn watch_network(&self) -> Option<JoinHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("Cannot watch network changes outside a tokio runtime");
            return None;
        };
        if self.inner.watching_network.swap(true, Ordering::AcqRel) {
            return None;
        }

        let mut changes = self.inner.network.subscribe();
        let inner = Arc::downgrade(&self.inner);
        Some(runtime.spawn(async move {
            while changes.changed().await.is_ok() {
                let connected = *changes.borrow_and_update();
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let queue = Self { inner };
                if connected && !queue.is_empty() {
                    tracing::info!(
                        "Back online with {} pending operations; scheduling sync pass",
                        queue.len()
                    );
                    queue.schedule_pass();
                }
            }
        }))
    }

    fn schedule_pass(&self) {
        match Handle::try_current() {
            Ok(runtime) => {
                let queue = self.clone();
                runtime.spawn(async move {
                    queue.process_queue().await;
                });
            }
            Err(_) => {
                tracing::debug!("No tokio runtime available; sync pass deferred");
            }
        }
    }

    fn handler_for(&self, entity_type: EntityType) -> Option<Arc<dyn EntityHandler>> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_type)
    }

    /// Bump the attempt counter of a still-queued operation and return a copy.
    fn record_attempt(&self, id: OperationId) -> Option<SyncOperation> {
        self.mutate_in_pass(|operations| {
            let operation = operations.iter_mut().find(|op| op.id == id)?;
            operation.mark_attempt();
            Some(operation.clone())
        })
        .0
    }

    fn take(&self, id: OperationId) -> Option<SyncOperation> {
        self.mutate_in_pass(|operations| remove_by_id(operations, id)).0
    }

    /// `mutate` for calls made from inside an async pass. Storage writes are
    /// blocking, so on a multi-threaded runtime the worker hands its other
    /// tasks off for the duration of the write.
    fn mutate_in_pass<R>(
        &self,
        change: impl FnOnce(&mut Vec<SyncOperation>) -> R,
    ) -> (R, Snapshot) {
        match Handle::try_current() {
            Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.mutate(change))
            }
            _ => self.mutate(change),
        }
    }

    fn operations(&self) -> MutexGuard<'_, Vec<SyncOperation>> {
        self.inner
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` and persist the result before releasing the lock, so
    /// concurrent writers cannot leave an older snapshot on disk. The returned
    /// snapshot is stamped with a revision taken under the same lock.
    fn mutate<R>(&self, change: impl FnOnce(&mut Vec<SyncOperation>) -> R) -> (R, Snapshot) {
        let mut operations = self.operations();
        let result = change(&mut operations);
        let snapshot = Snapshot {
            revision: self.inner.revision.fetch_add(1, Ordering::AcqRel) + 1,
            operations: operations.clone(),
        };
        if let Err(error) = self.persist(&snapshot.operations) {
            tracing::warn!(
                "Failed to persist sync queue ({} operations): {}",
                snapshot.operations.len(),
                error
            );
        }
        (result, snapshot)
    }

    fn persist(&self, snapshot: &[SyncOperation]) -> Result<()> {
        let payload = serde_json::to_string(snapshot)?;
        self.inner.store.set(&self.inner.storage_key, &payload)
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncQueue")
            .field("storage_key", &self.inner.storage_key)
            .field("pending", &self.len())
            .field("max_retries", &self.max_retries())
            .field("is_processing", &self.is_processing())
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

fn remove_by_id(operations: &mut Vec<SyncOperation>, id: OperationId) -> Option<SyncOperation> {
    let index = operations.iter().position(|op| op.id == id)?;
    Some(operations.remove(index))
}

fn load_persisted(store: &dyn KeyValueStore, key: &str) -> Vec<SyncOperation> {
    match store.get(key) {
        Ok(Some(payload)) => match serde_json::from_str(&payload) {
            Ok(operations) => operations,
            Err(error) => {
                tracing::warn!("Discarding unreadable persisted sync queue: {error}");
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(error) => {
            tracing::warn!("Failed to load persisted sync queue: {error}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STORAGE_KEY;
    use crate::error::Error;
    use crate::storage::MemoryKeyValueStore;
    use crate::sync::handler::{HandlerError, HandlerResult};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    const WAIT: Duration = Duration::from_secs(5);

    fn setup(connected: bool) -> (SyncQueue, NetworkMonitor, Arc<MemoryKeyValueStore>) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let network = NetworkMonitor::new(connected);
        let queue = SyncQueue::new(
            store.clone(),
            network.clone(),
            &SyncQueueConfig::default(),
        );
        (queue, network, store)
    }

    fn persisted(store: &MemoryKeyValueStore) -> Vec<SyncOperation> {
        let payload = store.get(DEFAULT_STORAGE_KEY).unwrap().unwrap_or_default();
        if payload.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&payload).unwrap()
        }
    }

    fn snapshot_channel(
        queue: &SyncQueue,
    ) -> (mpsc::UnboundedReceiver<Vec<SyncOperation>>, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = queue.add_listener(move |snapshot| {
            let _ = tx.send(snapshot.to_vec());
        });
        (rx, subscription)
    }

    async fn next_snapshot(
        rx: &mut mpsc::UnboundedReceiver<Vec<SyncOperation>>,
    ) -> Vec<SyncOperation> {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("listener was not notified in time")
            .expect("listener channel closed")
    }

    fn succeed() -> impl EntityHandler {
        |_op: SyncOperation| async { Ok::<_, HandlerError>(true) }
    }

    /// Records the retry count seen on each call.
    #[derive(Clone)]
    struct Recording {
        seen: Arc<Mutex<Vec<u32>>>,
        outcome: Option<bool>,
    }

    impl Recording {
        fn with_outcome(outcome: Option<bool>) -> Self {
            Self {
                seen: Arc::default(),
                outcome,
            }
        }

        fn seen(&self) -> Vec<u32> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EntityHandler for Recording {
        async fn apply(&self, operation: &SyncOperation) -> HandlerResult {
            self.seen.lock().unwrap().push(operation.retry_count);
            match self.outcome {
                Some(applied) => Ok(applied),
                None => Err(HandlerError::Remote("connection reset".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct GateState {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    /// Blocks inside `apply` until released.
    #[derive(Clone, Default)]
    struct Gate(Arc<GateState>);

    impl Gate {
        async fn wait_entered(&self) {
            tokio::time::timeout(WAIT, self.0.entered.notified())
                .await
                .expect("handler was not entered in time");
        }

        fn release(&self) {
            self.0.release.notify_one();
        }

        fn calls(&self) -> usize {
            self.0.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EntityHandler for Gate {
        async fn apply(&self, _operation: &SyncOperation) -> HandlerResult {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            self.0.entered.notify_one();
            self.0.release.notified().await;
            Ok(true)
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Database("disk full".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_enqueues_keep_insertion_order() {
        let (queue, _network, store) = setup(false);

        let ids: Vec<OperationId> = [
            EntityType::Symptom,
            EntityType::KickSession,
            EntityType::Contraction,
            EntityType::Weight,
        ]
        .into_iter()
        .map(|kind| queue.enqueue(kind, OperationType::Create, json!({}), None))
        .collect();

        let pending = queue.get_queue();
        assert_eq!(pending.iter().map(|op| op.id).collect::<Vec<_>>(), ids);
        assert!(pending.iter().all(|op| op.retry_count == 0));
        assert_eq!(persisted(&store), pending);
        assert_eq!(queue.process_queue().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connected_enqueue_drains_and_notifies_once_more() {
        let (queue, _network, _store) = setup(true);
        queue.register_handler(EntityType::Exercise, succeed());
        let (mut rx, _subscription) = snapshot_channel(&queue);

        queue.enqueue(
            EntityType::Exercise,
            OperationType::Create,
            json!({"minutes": 30}),
            None,
        );

        assert_eq!(next_snapshot(&mut rx).await.len(), 1);
        assert!(next_snapshot(&mut rx).await.is_empty());
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_operation_is_attempted_max_retries_times() {
        let (queue, network, store) = setup(false);
        let handler = Recording::with_outcome(Some(false));
        queue.register_handler(EntityType::Sleep, handler.clone());
        queue.set_max_retries(3);
        let id = queue.enqueue(EntityType::Sleep, OperationType::Create, json!({}), None);
        network.set_connected(true);

        let first = queue.process_queue().await.unwrap();
        assert_eq!(first.retained, 1);
        assert_eq!(queue.get_queue()[0].retry_count, 1);
        assert!(queue.get_queue()[0].last_retry.is_some());

        let second = queue.process_queue().await.unwrap();
        assert_eq!(second.retained, 1);
        assert_eq!(persisted(&store)[0].retry_count, 2);

        let third = queue.process_queue().await.unwrap();
        assert_eq!(third.dropped_exhausted, 1);

        assert_eq!(handler.seen(), vec![1, 2, 3]);
        assert!(!queue.get_queue().iter().any(|op| op.id == id));
        assert!(persisted(&store).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handler_errors_count_as_failures() {
        let (queue, network, _store) = setup(false);
        let handler = Recording::with_outcome(None);
        queue.register_handler(EntityType::BloodPressure, handler.clone());
        queue.set_max_retries(2);
        queue.enqueue(
            EntityType::BloodPressure,
            OperationType::Update,
            json!({"systolic": 118, "diastolic": 76}),
            Some("bp-1".to_string()),
        );
        network.set_connected(true);

        assert_eq!(queue.process_queue().await.unwrap().retained, 1);
        assert_eq!(queue.process_queue().await.unwrap().dropped_exhausted, 1);
        assert_eq!(handler.seen(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_failure_does_not_abort_the_pass() {
        let (queue, network, _store) = setup(false);
        queue.register_handler(EntityType::Mood, Recording::with_outcome(None));
        queue.register_handler(EntityType::FoodItem, succeed());
        queue.enqueue(EntityType::Mood, OperationType::Create, json!({}), None);
        queue.enqueue(EntityType::FoodItem, OperationType::Create, json!({}), None);
        network.set_connected(true);

        let report = queue.process_queue().await.unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.retained, 1);
        assert_eq!(queue.get_queue()[0].entity_type, EntityType::Mood);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_passes_run_once() {
        let (queue, network, _store) = setup(false);
        let gate = Gate::default();
        queue.register_handler(EntityType::Profile, gate.clone());
        queue.enqueue(
            EntityType::Profile,
            OperationType::Update,
            json!({"due_date": "2026-03-01"}),
            Some("me".to_string()),
        );
        network.set_connected(true);

        let running = tokio::spawn({
            let queue = queue.clone();
            async move { queue.process_queue().await }
        });
        gate.wait_entered().await;

        assert!(queue.is_processing());
        assert_eq!(queue.process_queue().await, None);
        assert_eq!(queue.sync_state(), SyncState::Syncing);

        gate.release();
        let report = running.await.unwrap().unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(gate.calls(), 1);
        assert!(!queue.is_processing());
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_during_pass_waits_for_next_pass() {
        let (queue, network, store) = setup(false);
        let gate = Gate::default();
        queue.register_handler(EntityType::Timeline, gate.clone());
        queue.enqueue(
            EntityType::Timeline,
            OperationType::Create,
            json!({"week": 12}),
            None,
        );
        network.set_connected(true);

        let running = tokio::spawn({
            let queue = queue.clone();
            async move { queue.process_queue().await }
        });
        gate.wait_entered().await;

        let late = queue.enqueue(
            EntityType::Timeline,
            OperationType::Create,
            json!({"week": 13}),
            None,
        );
        gate.release();
        let report = running.await.unwrap().unwrap();

        assert_eq!(report.attempted, 1);
        let pending = queue.get_queue();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, late);
        assert_eq!(pending[0].retry_count, 0);
        assert_eq!(persisted(&store), pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operation_removed_mid_pass_is_skipped() {
        let (queue, network, _store) = setup(false);
        let gate = Gate::default();
        queue.register_handler(EntityType::Contraction, gate.clone());
        queue.enqueue(EntityType::Contraction, OperationType::Create, json!({}), None);
        let cancelled =
            queue.enqueue(EntityType::Contraction, OperationType::Create, json!({}), None);
        network.set_connected(true);

        let running = tokio::spawn({
            let queue = queue.clone();
            async move { queue.process_queue().await }
        });
        gate.wait_entered().await;
        assert!(queue.remove_from_queue(cancelled));
        gate.release();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(gate.calls(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unhandled_entity_type_is_dropped_without_attempt() {
        let (queue, network, store) = setup(false);
        let handler = Recording::with_outcome(Some(true));
        queue.register_handler(EntityType::Weight, handler.clone());
        queue.enqueue(
            EntityType::Symptom,
            OperationType::Create,
            json!({"nausea": true}),
            None,
        );
        queue.enqueue(
            EntityType::Weight,
            OperationType::Create,
            json!({"kg": 64}),
            None,
        );
        network.set_connected(true);

        let report = queue.process_queue().await.unwrap();

        assert_eq!(report.dropped_unhandled, 1);
        assert_eq!(report.attempted, 1);
        assert_eq!(handler.seen(), vec![1]);
        assert!(queue.is_empty());
        assert!(persisted(&store).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn persisted_copy_tracks_memory() {
        let (queue, network, store) = setup(false);
        queue.register_handler(EntityType::Mood, Recording::with_outcome(Some(false)));
        queue.register_handler(EntityType::Sleep, succeed());

        let mood = queue.enqueue(
            EntityType::Mood,
            OperationType::Create,
            json!({"score": 4}),
            None,
        );
        let removed = queue.enqueue(
            EntityType::Exercise,
            OperationType::Delete,
            json!(null),
            Some("ex-1".to_string()),
        );
        queue.enqueue(
            EntityType::Sleep,
            OperationType::Create,
            json!({"hours": 7}),
            None,
        );
        assert_eq!(persisted(&store), queue.get_queue());

        assert!(queue.remove_from_queue(removed));
        assert!(!queue.remove_from_queue(removed));
        assert_eq!(persisted(&store), queue.get_queue());

        network.set_connected(true);
        queue.process_queue().await.unwrap();

        let pending = queue.get_queue();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, mood);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(persisted(&store), pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restores_from_storage() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let network = NetworkMonitor::new(false);
        let config = SyncQueueConfig::default();

        let first = SyncQueue::new(store.clone(), network.clone(), &config);
        let id = first.enqueue(
            EntityType::HealthLog,
            OperationType::Create,
            json!({"weight": 70}),
            None,
        );
        drop(first);

        let second = SyncQueue::new(store, network, &config);
        let pending = second.get_queue();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].data, json!({"weight": 70}));
    }

    #[test]
    fn unreadable_storage_starts_empty() {
        let store = Arc::new(MemoryKeyValueStore::new());
        store.set(DEFAULT_STORAGE_KEY, "{not json").unwrap();
        let queue = SyncQueue::new(
            store,
            NetworkMonitor::default(),
            &SyncQueueConfig::default(),
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn persistence_failure_keeps_memory_state() {
        let queue = SyncQueue::new(
            Arc::new(FailingStore),
            NetworkMonitor::default(),
            &SyncQueueConfig::default(),
        );
        let id = queue.enqueue(
            EntityType::Profile,
            OperationType::Update,
            json!({}),
            Some("me".to_string()),
        );
        assert_eq!(queue.len(), 1);
        assert!(queue.remove_from_queue(id));
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_outside_runtime_does_not_panic() {
        let (queue, _network, _store) = setup(true);
        queue.enqueue(EntityType::Mood, OperationType::Create, json!({}), None);
        assert_eq!(queue.len(), 1);
        assert!(queue.watch_network().is_none());
    }

    #[test]
    fn clear_and_listeners() {
        let (queue, _network, store) = setup(false);
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = queue.add_listener({
            let calls = Arc::clone(&calls);
            move |_snapshot| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        queue.enqueue(EntityType::Mood, OperationType::Create, json!({}), None);
        queue.enqueue(EntityType::Sleep, OperationType::Create, json!({}), None);
        queue.clear_queue();
        assert!(queue.is_empty());
        assert!(persisted(&store).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        drop(subscription);
        queue.enqueue(EntityType::Mood, OperationType::Create, json!({}), None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn last_registered_handler_wins() {
        let (queue, network, _store) = setup(false);
        let replaced = Recording::with_outcome(Some(false));
        queue.register_handler(EntityType::FoodItem, replaced.clone());
        queue.register_handler(EntityType::FoodItem, succeed());
        queue.enqueue(
            EntityType::FoodItem,
            OperationType::Create,
            json!({"name": "lentils"}),
            None,
        );
        network.set_connected(true);

        assert_eq!(queue.process_queue().await.unwrap().succeeded, 1);
        assert!(replaced.seen().is_empty());
    }

    #[test]
    fn stats_and_state() {
        let (queue, network, _store) = setup(false);
        queue.set_max_retries(5);
        queue.enqueue(EntityType::Mood, OperationType::Create, json!({}), None);
        queue.enqueue(
            EntityType::Mood,
            OperationType::Delete,
            json!(null),
            Some("m1".to_string()),
        );

        let stats = queue.get_queue_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.max_retries, 5);
        assert_eq!(stats.by_entity.get(&EntityType::Mood), Some(&2));
        assert!(!stats.is_processing);

        assert_eq!(queue.sync_state(), SyncState::Offline);
        network.set_connected(true);
        assert_eq!(queue.sync_state(), SyncState::Pending(2));
        queue.clear_queue();
        assert_eq!(queue.sync_state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconnect_replays_offline_health_log() {
        let (queue, network, store) = setup(false);
        let received = Arc::new(Mutex::new(Vec::new()));
        queue.register_handler(EntityType::HealthLog, {
            let received = Arc::clone(&received);
            move |op: SyncOperation| {
                let received = Arc::clone(&received);
                async move {
                    received.lock().unwrap().push(op.data);
                    Ok::<_, HandlerError>(true)
                }
            }
        });
        let watcher = queue.watch_network().unwrap();
        assert!(queue.watch_network().is_none());

        queue.enqueue(
            EntityType::HealthLog,
            OperationType::Create,
            json!({"weight": 70}),
            None,
        );
        let pending = queue.get_queue();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 0);

        let (mut rx, _subscription) = snapshot_channel(&queue);
        network.set_connected(true);

        assert!(next_snapshot(&mut rx).await.is_empty());
        assert!(queue.is_empty());
        assert!(persisted(&store).is_empty());
        assert_eq!(*received.lock().unwrap(), vec![json!({"weight": 70})]);

        watcher.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disconnect_does_not_trigger_a_pass() {
        let (queue, network, _store) = setup(true);
        let handler = Recording::with_outcome(Some(true));
        queue.register_handler(EntityType::Sleep, handler.clone());
        let watcher = queue.watch_network().unwrap();

        network.set_connected(false);
        queue.enqueue(EntityType::Sleep, OperationType::Create, json!({}), None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handler.seen().is_empty());
        assert_eq!(queue.len(), 1);
        watcher.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn final_notification_sees_pass_finished() {
        let (queue, network, _store) = setup(false);
        queue.register_handler(EntityType::Weight, succeed());
        queue.enqueue(
            EntityType::Weight,
            OperationType::Create,
            json!({"kg": 65}),
            None,
        );
        network.set_connected(true);

        let observed = Arc::new(Mutex::new(Vec::new()));
        let _subscription = queue.add_listener({
            let queue = queue.clone();
            let observed = Arc::clone(&observed);
            move |snapshot| {
                observed.lock().unwrap().push((
                    snapshot.len(),
                    queue.sync_state(),
                    queue.get_queue_stats().is_processing,
                ));
            }
        });

        queue.process_queue().await.unwrap();

        assert_eq!(*observed.lock().unwrap(), vec![(0, SyncState::Synced, false)]);
    }

    #[test]
    fn concurrent_enqueues_leave_listener_on_latest_snapshot() {
        for _ in 0..50 {
            let (queue, _network, _store) = setup(false);
            let last_seen = Arc::new(Mutex::new(None));
            let _subscription = queue.add_listener({
                let last_seen = Arc::clone(&last_seen);
                move |snapshot| {
                    *last_seen.lock().unwrap() = Some(snapshot.len());
                }
            });

            std::thread::scope(|scope| {
                for _ in 0..8 {
                    let queue = queue.clone();
                    scope.spawn(move || {
                        for _ in 0..20 {
                            queue.enqueue(
                                EntityType::Mood,
                                OperationType::Create,
                                json!({}),
                                None,
                            );
                        }
                    });
                }
            });

            assert_eq!(queue.len(), 160);
            assert_eq!(*last_seen.lock().unwrap(), Some(queue.len()));
        }
    }

    /// Memory store whose writes block the calling thread for a while.
    struct SlowStore {
        inner: MemoryKeyValueStore,
        writing: Arc<AtomicBool>,
    }

    impl KeyValueStore for SlowStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.writing.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(150));
            self.writing.store(false, Ordering::SeqCst);
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn pass_writes_do_not_stall_other_tasks() {
        let writing = Arc::new(AtomicBool::new(false));
        let store = SlowStore {
            inner: MemoryKeyValueStore::new(),
            writing: Arc::clone(&writing),
        };
        let network = NetworkMonitor::new(false);
        let queue = SyncQueue::new(
            Arc::new(store),
            network.clone(),
            &SyncQueueConfig::default(),
        );
        queue.register_handler(EntityType::Sleep, succeed());
        queue.enqueue(EntityType::Sleep, OperationType::Create, json!({}), None);
        network.set_connected(true);

        let ticks_during_write = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let writing = Arc::clone(&writing);
            let ticks = Arc::clone(&ticks_during_write);
            async move {
                loop {
                    if writing.load(Ordering::SeqCst) {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });
        let pass = tokio::spawn({
            let queue = queue.clone();
            async move { queue.process_queue().await }
        });

        let report = pass.await.unwrap().unwrap();
        ticker.abort();

        assert_eq!(report.succeeded, 1);
        assert!(queue.is_empty());
        assert!(ticks_during_write.load(Ordering::SeqCst) > 0);
    }
}
