//! Entity handlers: the code that applies a queued operation remotely.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EntityType, SyncOperation};

/// Failure raised by a handler while applying an operation.
///
/// The queue treats every variant as transient: the operation stays queued
/// until it succeeds or runs out of retries.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Remote request failed: {0}")]
    Remote(String),
    #[error("Remote store rejected the operation: {0}")]
    Rejected(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// `Ok(true)` applied, `Ok(false)` not applied (retry later), `Err` failed (retry later).
pub type HandlerResult = std::result::Result<bool, HandlerError>;

/// Applies operations of one entity type to the remote store.
#[async_trait]
pub trait EntityHandler: Send + Sync {
    async fn apply(&self, operation: &SyncOperation) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> EntityHandler for F
where
    F: Fn(SyncOperation) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn apply(&self, operation: &SyncOperation) -> HandlerResult {
        self(operation.clone()).await
    }
}

/// One handler per entity type; registering again replaces the previous one.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EntityType, Arc<dyn EntityHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `entity_type`, returning the handler it replaced.
    pub fn register(
        &mut self,
        entity_type: EntityType,
        handler: Arc<dyn EntityHandler>,
    ) -> Option<Arc<dyn EntityHandler>> {
        self.handlers.insert(entity_type, handler)
    }

    pub fn get(&self, entity_type: EntityType) -> Option<Arc<dyn EntityHandler>> {
        self.handlers.get(&entity_type).cloned()
    }

    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.handlers.contains_key(&entity_type)
    }

    /// Entity types that have a handler, in declaration order.
    pub fn registered_types(&self) -> Vec<EntityType> {
        EntityType::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HandlerRegistry")
            .field("registered", &self.registered_types())
            .finish()
    }
}
