//! Shared cross-platform state types.

/// Unified sync state used to drive the pending-changes indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Network reported disconnected
    Offline,
    /// A queue pass is in flight
    Syncing,
    /// Connected and idle, with operations still queued
    Pending(usize),
    /// Connected and nothing queued
    Synced,
}

impl SyncState {
    /// Derive the state from connectivity, the in-flight flag and the pending count.
    pub const fn derive(is_connected: bool, is_processing: bool, pending: usize) -> Self {
        if !is_connected {
            Self::Offline
        } else if is_processing {
            Self::Syncing
        } else if pending > 0 {
            Self::Pending(pending)
        } else {
            Self::Synced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_wins_over_everything() {
        assert_eq!(SyncState::derive(false, true, 4), SyncState::Offline);
    }

    #[test]
    fn connected_states() {
        assert_eq!(SyncState::derive(true, true, 2), SyncState::Syncing);
        assert_eq!(SyncState::derive(true, false, 2), SyncState::Pending(2));
        assert_eq!(SyncState::derive(true, false, 0), SyncState::Synced);
    }
}
