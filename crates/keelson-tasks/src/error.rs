//! Task engine error types.

use keelson_core::CoreError;
use keelson_store::StoreError;
use thiserror::Error;

/// Result type alias for task engine operations.
pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    /// A task for the same operation and resource is already queued or
    /// running.
    #[error("task {id} for {operation} on {address} is already pending")]
    Duplicate {
        id: String,
        operation: String,
        address: String,
    },

    /// Another supervisor changed the task between our read and our claim.
    #[error("task {0} was claimed elsewhere")]
    ClaimLost(String),

    #[error("action is not bound to a resource: {0}")]
    Unbound(String),

    /// Recording the outcome of a task failed; its stored state is unknown.
    #[error("failed to persist outcome of task {id}: {source}")]
    Persistence {
        id: String,
        #[source]
        source: Box<TaskError>,
    },

    #[error("all workers have stopped")]
    WorkersStopped,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskError {
    /// True when the task record no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::Store(e) if e.is_not_found())
    }
}
