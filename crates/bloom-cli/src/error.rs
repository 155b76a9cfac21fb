use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] bloom_core::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("{0} operations need --entity-id")]
    MissingEntityId(String),
    #[error("Operation ID cannot be empty")]
    EmptyOperationId,
    #[error("Operation not found for id/prefix: {0}")]
    OperationNotFound(String),
    #[error("{0}")]
    AmbiguousOperationId(String),
    #[error("Refusing to clear {0} pending operations without --yes")]
    ClearNotConfirmed(usize),
}
