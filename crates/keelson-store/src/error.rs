//! Error types for the coordination store.

use thiserror::Error;

/// Result type alias for coordination store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during coordination store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("invalid key {0:?}: keys must start with '/'")]
    InvalidKey(String),

    /// `create` hit an existing key.
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("key not found: {0}")]
    NotFound(String),

    /// `compare_and_swap` found a value other than the expected one.
    #[error("compare failed for key {0}: value changed since it was read")]
    CompareFailed(String),
}

impl StoreError {
    /// True for the two conditional-write failures: duplicate create and
    /// lost compare-and-swap.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists(_) | Self::CompareFailed(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
