//! keelson-store — coordination store for the keelson control plane.
//!
//! Backed by [redb](https://docs.rs/redb). Offers the small set of
//! primitives the task engine builds on: get, create (fails on existing
//! key), update (fails on missing key), delete, prefix listing and an
//! atomic compare-and-swap keyed by the previously read value.
//!
//! # Architecture
//!
//! Every key lives under the fixed root namespace [`ROOT_NAMESPACE`], in one
//! redb table. Each mutating call runs in its own write transaction, and
//! redb serialises write transactions, so the existence and value checks of
//! `create` and `compare_and_swap` are atomic with respect to every other
//! writer sharing the same [`CoordinationStore`] handle.
//!
//! The store is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and
//! can be shared across async tasks and across scheduler instances.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use store::{CoordinationStore, ROOT_NAMESPACE};
