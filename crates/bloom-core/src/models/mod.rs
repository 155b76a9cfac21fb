//! Data models for Bloom

mod operation;

pub use operation::{EntityType, OperationId, OperationType, SyncOperation};
