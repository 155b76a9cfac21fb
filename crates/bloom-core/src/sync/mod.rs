//! Offline sync queue: buffers mutations while disconnected and replays them
//! through per-entity handlers once the network is back.

mod handler;
mod listeners;
mod queue;
mod stats;

pub use handler::{EntityHandler, HandlerError, HandlerRegistry, HandlerResult};
pub use listeners::Subscription;
pub use queue::SyncQueue;
pub use stats::{PassReport, QueueStats};
