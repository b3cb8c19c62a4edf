//! Error types for keelson-core.

use thiserror::Error;

use crate::types::ResourceKind;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] keelson_store::StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The address has a segment that is not valid at its position.
    #[error("invalid resource address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A resource segment of the address has no record behind it.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("no operation {name:?} registered for {kind}")]
    UnknownOperation { kind: ResourceKind, name: String },
}

impl CoreError {
    /// True when a create collided with an existing record.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_conflict())
    }
}
