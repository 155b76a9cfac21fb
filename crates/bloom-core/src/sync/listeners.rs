//! Snapshot listeners with explicit unsubscribe handles.
//!
//! Mutations on different threads can finish in any order, so each snapshot
//! carries the revision it was taken at. Delivery is serialized: one thread
//! at a time runs the callbacks, in revision order, and a snapshot older than
//! the last one delivered is skipped. Listeners therefore always end on the
//! latest queue contents.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::models::SyncOperation;

type Callback = Arc<dyn Fn(&[SyncOperation]) + Send + Sync>;

/// Queue contents as of one mutation.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) revision: u64,
    pub(crate) operations: Vec<SyncOperation>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

#[derive(Default)]
struct Delivery {
    pending: Vec<Snapshot>,
    delivering: bool,
    last_revision: Option<u64>,
}

/// Set of callbacks receiving the full queue snapshot after each change.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    table: Arc<Mutex<ListenerTable>>,
    delivery: Arc<Mutex<Delivery>>,
}

/// Releases the delivery slot if a callback panics mid-delivery.
struct DeliveryGuard<'a>(&'a Mutex<Delivery>);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut delivery = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            delivery.delivering = false;
        }
    }
}

impl Listeners {
    fn table(&self) -> MutexGuard<'_, ListenerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, callback: Callback) -> Subscription {
        let mut table = self.table();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, callback));
        Subscription {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.table().entries.len()
    }

    /// Hand `snapshot` to every callback.
    ///
    /// If another thread is already delivering, the snapshot is left for that
    /// thread and this call returns at once. Callbacks run outside every lock,
    /// so they may read the queue, mutate it, or change subscriptions.
    pub(crate) fn notify(&self, snapshot: Snapshot) {
        let mut batch = {
            let mut delivery = self.delivery();
            delivery.pending.push(snapshot);
            if delivery.delivering {
                return;
            }
            delivery.delivering = true;
            std::mem::take(&mut delivery.pending)
        };
        let _guard = DeliveryGuard(&self.delivery);

        loop {
            batch.sort_by_key(|snapshot| snapshot.revision);
            for snapshot in batch {
                if self.advance(snapshot.revision) {
                    self.run_callbacks(&snapshot.operations);
                }
            }

            let mut delivery = self.delivery();
            if delivery.pending.is_empty() {
                delivery.delivering = false;
                return;
            }
            batch = std::mem::take(&mut delivery.pending);
        }
    }

    /// Record `revision` as delivered unless a newer one already was.
    fn advance(&self, revision: u64) -> bool {
        let mut delivery = self.delivery();
        if delivery.last_revision.is_some_and(|last| revision <= last) {
            return false;
        }
        delivery.last_revision = Some(revision);
        true
    }

    fn run_callbacks(&self, operations: &[SyncOperation]) {
        let callbacks: Vec<Callback> = self
            .table()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(operations);
        }
    }
}

/// Handle returned by `SyncQueue::add_listener`.
///
/// The listener stays attached while the handle lives; dropping it (or calling
/// [`Subscription::unsubscribe`]) detaches it.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the listener attached for the lifetime of the queue.
    pub fn detach(mut self) {
        self.table = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
