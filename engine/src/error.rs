//! Error types for the SwarmLite engine

pub use swarmlite_core::error::{IntegrityError, ValidationError};

/// Main error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Definition-time validation failure; nothing was persisted
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No workflow with this id in the store
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A workflow with this id already exists and the idempotency keys do
    /// not match
    #[error("workflow already exists: {0}")]
    WorkflowExists(String),

    /// No handler registered under this name
    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    /// The governance gate denied a task
    #[error("governance denied: {0}")]
    GovernanceDenied(String),

    /// The state store failed or a row signature did not verify
    #[error("state store error: {0}")]
    Store(String),

    /// Audit chain verification failed at resume
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Missing or malformed configuration (env vars, key lengths, policy file)
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
