//! Connectivity tracking.
//!
//! `NetworkMonitor` holds the last known connectivity flag. The host platform
//! (or the optional [`ConnectivityProbe`]) reports changes through
//! [`NetworkMonitor::set_connected`]; consumers read the flag or subscribe to
//! transitions. Dropping the receiver unsubscribes.

mod probe;

pub use probe::ConnectivityProbe;

use std::sync::Arc;

use tokio::sync::watch;

/// Shared connectivity state. Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// Create a monitor with an initial connectivity value.
    pub fn new(connected: bool) -> Self {
        let (state, _) = watch::channel(connected);
        Self {
            state: Arc::new(state),
        }
    }

    /// Last reported connectivity.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    /// Report connectivity. Subscribers are only woken on an actual change.
    ///
    /// Returns `true` when the value changed.
    pub fn set_connected(&self, connected: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            if connected {
                tracing::info!("Network connectivity restored");
            } else {
                tracing::info!("Network connectivity lost");
            }
        }
        changed
    }

    /// Subscribe to connectivity transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
