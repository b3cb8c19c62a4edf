//! keelson-core — the resource side of the keelson control plane.
//!
//! - [`config`]: the process configuration, built once and passed down.
//! - [`types`]: persisted domain records (apps, components, releases,
//!   instances, volumes, nodes, entrypoints).
//! - [`location`]: hierarchical resource addresses and their resolution.
//! - [`catalog`]: typed persistence of domain records in the coordination store.
//! - [`provider`]: the cloud/cluster collaborator seam.
//! - [`operations`]: the static registry of named operations per resource kind.
//! - [`context`]: the root context handed to every operation.

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod location;
pub mod operations;
pub mod provider;
pub mod types;

pub use catalog::Catalog;
pub use config::KeelsonConfig;
pub use context::Core;
pub use error::{CoreError, CoreResult};
pub use location::{Location, address_of, resolve};
pub use operations::{OPERATIONS, Operation, find_operation, operations_for};
pub use provider::memory::{Fault, ScriptedProvider};
pub use provider::{DryRunProvider, Provider, ServerInfo};
pub use types::*;
