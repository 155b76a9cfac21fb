//! Queue introspection types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{EntityType, OperationType, SyncOperation};

/// Point-in-time summary of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub by_entity: BTreeMap<EntityType, usize>,
    pub by_operation: BTreeMap<OperationType, usize>,
    /// Operations that have been attempted at least once
    pub retrying: usize,
    /// Enqueue time of the oldest operation
    pub oldest: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub is_processing: bool,
}

impl QueueStats {
    pub(crate) fn collect(
        operations: &[SyncOperation],
        max_retries: u32,
        is_processing: bool,
    ) -> Self {
        let mut by_entity = BTreeMap::new();
        let mut by_operation = BTreeMap::new();
        for op in operations {
            *by_entity.entry(op.entity_type).or_insert(0) += 1;
            *by_operation.entry(op.operation_type).or_insert(0) += 1;
        }

        Self {
            total: operations.len(),
            by_entity,
            by_operation,
            retrying: operations.iter().filter(|op| op.retry_count > 0).count(),
            oldest: operations.iter().map(|op| op.timestamp).min(),
            max_retries,
            is_processing,
        }
    }
}

/// Outcome counts of one processing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Handler invocations
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed but still within the retry cap
    pub retained: usize,
    /// Failed and dropped at the retry cap
    pub dropped_exhausted: usize,
    /// Dropped because no handler was registered
    pub dropped_unhandled: usize,
    /// Removed from the queue by someone else before their turn came
    pub skipped: usize,
}
