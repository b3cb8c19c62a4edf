//! An action is "perform operation O on resource R", in a form that survives a
//! process restart.
//!
//! Only the operation name and the resource address are persisted. The
//! live resource and the root context are bound again by
//! [`Action::initialize`] in whichever process ends up running the task.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use keelson_core::{Core, Resource, address_of, find_operation, resolve};

use crate::error::{TaskError, TaskResult};
use crate::supervisor::Supervisor;
use crate::task::{Task, Tasks};

#[derive(Clone, Serialize, Deserialize)]
pub struct Action {
    pub operation_name: String,
    /// Empty until [`Action::supervise`] fills it in.
    #[serde(default)]
    pub resource_address: String,
    #[serde(skip)]
    resource: Option<Resource>,
    #[serde(skip)]
    core: Option<Core>,
}

/// Deterministic task id for `operation` on the resource at `address`:
/// lowercase hex SHA-256 of `"<operation>:<address>"`.
pub fn identity_of(operation: &str, address: &str) -> String {
    hex::encode(Sha256::digest(format!("{operation}:{address}").as_bytes()))
}

impl Action {
    /// Describe `operation` on a live resource. Fails if the resource kind
    /// has no such operation.
    pub fn describe(operation: &str, resource: &Resource) -> TaskResult<Self> {
        find_operation(resource.kind(), operation)?;
        Ok(Self {
            operation_name: operation.to_string(),
            resource_address: String::new(),
            resource: Some(resource.clone()),
            core: None,
        })
    }

    /// Task id of this action. Stable for a given operation and address.
    pub fn identity(&self) -> String {
        identity_of(&self.operation_name, &self.resource_address)
    }

    /// The resolved target, if bound.
    pub fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    /// Address the action's resource and enqueue it as a new task.
    ///
    /// Returns once the task is durably queued. Fails with
    /// [`TaskError::Duplicate`] if the same operation is already pending on
    /// the same resource.
    pub fn supervise(&mut self, core: &Core) -> TaskResult<Task> {
        let resource = self
            .resource
            .as_ref()
            .ok_or_else(|| TaskError::Unbound(self.operation_name.clone()))?;
        self.resource_address = address_of(&resource.location());
        self.core = Some(core.clone());

        let task = Tasks::from_core(core).enqueue(self)?;
        info!(
            task_id = %task.id,
            operation = %self.operation_name,
            address = %self.resource_address,
            "task enqueued"
        );
        Ok(task)
    }

    /// Bind the root context and resolve the resource address.
    ///
    /// Used when rebuilding an action from its persisted form. Fails if any
    /// resource along the address no longer exists.
    pub fn initialize(&mut self, core: &Core) -> TaskResult<()> {
        let resource = resolve(&core.catalog, &self.resource_address)?;
        self.resource = Some(resource);
        self.core = Some(core.clone());
        Ok(())
    }

    /// Run the named operation against the bound resource.
    pub async fn perform(&self) -> anyhow::Result<()> {
        let (Some(core), Some(resource)) = (&self.core, &self.resource) else {
            return Err(TaskError::Unbound(self.operation_name.clone()).into());
        };
        let operation = find_operation(resource.kind(), &self.operation_name)?;
        operation.perform(core, resource).await
    }

    /// Revoke every task addressed to this action's resource or to anything
    /// below it. Workers of `supervisor` running one of those tasks are
    /// released first. Failures are logged, not returned.
    pub fn cancel_tasks(&self, supervisor: &Supervisor) {
        let address = match &self.resource {
            Some(resource) => address_of(&resource.location()),
            None => self.resource_address.clone(),
        };
        if let Err(e) = supervisor.revoke(&address) {
            warn!(%address, error = %e, "failed to revoke pending tasks");
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("operation_name", &self.operation_name)
            .field("resource_address", &self.resource_address)
            .field("bound", &self.core.is_some())
            .finish()
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.operation_name == other.operation_name
            && self.resource_address == other.resource_address
    }
}
