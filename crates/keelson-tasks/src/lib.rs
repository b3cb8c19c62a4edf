//! keelson-tasks — durable, retried, at-most-one-in-flight execution of
//! operations on keelson resources.
//!
//! A caller describes an [`Action`] against a live resource and calls
//! [`Action::supervise`], which persists a `Queued` [`Task`] keyed by the
//! action's identity and returns. A [`Supervisor`] later claims the task
//! and a worker resolves the resource again and performs the operation.
//!
//! # Architecture
//!
//! ```text
//! Action::supervise ──create──▶ /tasks/<identity>   (Queued)
//!                                    │
//! Supervisor poll loop ──CAS claim──▶ (Running) ──dispatch──▶ Worker
//!                                                               │
//!            success: delete ◀── perform on spawned task ◀─ resolve
//!            failure: requeue (attempts + 1) or delete when spent
//! ```

pub mod action;
pub mod error;
pub mod supervisor;
pub mod task;
mod worker;

pub use action::{Action, identity_of};
pub use error::{TaskError, TaskResult};
pub use supervisor::Supervisor;
pub use task::{DEFAULT_MAX_ATTEMPTS, Task, TaskStatus, Tasks};
