//! bloom-core - Core library for Bloom
//!
//! This crate contains the offline sync queue used by the Bloom pregnancy
//! tracker: queued operation models, key-value persistence, connectivity
//! tracking, and the queue that replays writes once the device is back online.

pub mod config;
pub mod error;
pub mod models;
pub mod network;
pub mod services;
pub mod state;
pub mod storage;
pub mod sync;
mod util;

pub use error::{Error, Result};
pub use models::{EntityType, OperationId, OperationType, SyncOperation};
pub use state::SyncState;
pub use sync::SyncQueue;
