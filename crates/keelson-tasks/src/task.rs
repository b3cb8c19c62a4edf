//! Task records and the `/tasks` collection.
//!
//! The store holds only pending work: a task is created `Queued`, flips to
//! `Running` when a supervisor claims it, and is deleted once it succeeds
//! or runs out of attempts.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use keelson_core::{Core, CoreError, epoch_secs};
use keelson_store::{CoordinationStore, StoreError};

use crate::action::Action;
use crate::error::{TaskError, TaskResult};

const TASKS_DIR: &str = "/tasks";

/// Attempts budget used when none is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// The action's identity; also the leaf of the storage key.
    pub id: String,
    pub action: Action,
    pub status: TaskStatus,
    /// Worker holding the task; `None` while queued.
    #[serde(default)]
    pub worker_id: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    /// The stored value this task was last read from or written as. Used as
    /// the expected value when claiming.
    #[serde(skip)]
    snapshot: Option<String>,
}

impl Task {
    fn key(&self) -> String {
        task_key(&self.id)
    }
}

fn task_key(id: &str) -> String {
    format!("{TASKS_DIR}/{id}")
}

/// Handle on the pending-task collection.
#[derive(Clone)]
pub struct Tasks {
    store: CoordinationStore,
    max_attempts: u32,
}

impl Tasks {
    pub fn new(store: CoordinationStore, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    pub fn from_core(core: &Core) -> Self {
        Self::new(core.store().clone(), core.config.supervisor.max_attempts)
    }

    /// Persist a new `Queued` task for `action`, keyed by its identity.
    ///
    /// Fails with [`TaskError::Duplicate`] if a task with that identity
    /// already exists.
    pub fn enqueue(&self, action: &Action) -> TaskResult<Task> {
        let now = epoch_secs();
        let mut task = Task {
            id: action.identity(),
            action: action.clone(),
            status: TaskStatus::Queued,
            worker_id: None,
            attempts: 0,
            max_attempts: self.max_attempts,
            last_error: None,
            created_at: now,
            updated_at: now,
            snapshot: None,
        };
        let value = serde_json::to_string(&task)?;
        match self.store.create(&task.key(), &value) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                return Err(TaskError::Duplicate {
                    id: task.id,
                    operation: action.operation_name.clone(),
                    address: action.resource_address.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        task.snapshot = Some(value);
        Ok(task)
    }

    /// Every pending task, in key order.
    pub fn list(&self) -> TaskResult<Vec<Task>> {
        self.store
            .list(TASKS_DIR)?
            .into_iter()
            .map(|(_, value)| decode(value))
            .collect()
    }

    pub fn get(&self, id: &str) -> TaskResult<Option<Task>> {
        self.store.get(&task_key(id))?.map(decode).transpose()
    }

    /// Overwrite the stored task with `task`.
    pub fn update(&self, task: &mut Task) -> TaskResult<()> {
        task.updated_at = epoch_secs();
        let value = serde_json::to_string(task)?;
        self.store.update(&task.key(), &value)?;
        task.snapshot = Some(value);
        Ok(())
    }

    /// Flip `task` from its last-read `Queued` state to `Running`.
    ///
    /// The write only lands if the stored value is still exactly the one
    /// `task` was read from, so of several supervisors racing on the same
    /// task exactly one wins. The losers, and anyone holding a copy that was
    /// already `Running` when read, get [`TaskError::ClaimLost`].
    pub fn claim(&self, task: &mut Task) -> TaskResult<()> {
        if task.status != TaskStatus::Queued {
            return Err(TaskError::ClaimLost(task.id.clone()));
        }
        let prev = task
            .snapshot
            .clone()
            .ok_or_else(|| TaskError::ClaimLost(task.id.clone()))?;

        let mut claimed = task.clone();
        claimed.status = TaskStatus::Running;
        claimed.updated_at = epoch_secs();
        let next = serde_json::to_string(&claimed)?;

        match self.store.compare_and_swap(&task.key(), &prev, &next) {
            Ok(()) => {}
            Err(e) if e.is_conflict() || e.is_not_found() => {
                return Err(TaskError::ClaimLost(task.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        claimed.snapshot = Some(next);
        *task = claimed;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Requeues the task with one more attempt counted while the budget
    /// lasts, and deletes it once `attempts` has reached `max_attempts`.
    /// Returns true if the task was requeued.
    pub fn record_error(&self, task: &mut Task, message: &str) -> TaskResult<bool> {
        task.last_error = Some(message.to_string());
        if task.attempts < task.max_attempts {
            task.status = TaskStatus::Queued;
            task.attempts += 1;
            task.worker_id = None;
            self.update(task)?;
            warn!(
                task_id = %task.id,
                attempts = task.attempts,
                max_attempts = task.max_attempts,
                error = %message,
                "task failed, requeued"
            );
            Ok(true)
        } else {
            self.delete(task)?;
            error!(
                task_id = %task.id,
                operation = %task.action.operation_name,
                address = %task.action.resource_address,
                attempts = task.attempts,
                error = %message,
                "task failed permanently, abandoned"
            );
            Ok(false)
        }
    }

    /// Remove `task`. Returns true if it was still stored.
    pub fn delete(&self, task: &Task) -> TaskResult<bool> {
        let existed = self.store.delete(&task.key())?;
        debug!(task_id = %task.id, existed, "task deleted");
        Ok(existed)
    }

    /// Every task addressed to `address` or to a resource below it.
    ///
    /// The address must name something below the root; an empty or `/`
    /// address would match every task and is rejected.
    pub fn by_resource(&self, address: &str) -> TaskResult<Vec<Task>> {
        let base = address.trim_end_matches('/');
        if base.is_empty() || !base.starts_with('/') {
            return Err(CoreError::InvalidAddress {
                address: address.to_string(),
                reason: "revocation needs an address below the root".into(),
            }
            .into());
        }
        let below = format!("{base}/");
        Ok(self
            .list()?
            .into_iter()
            .filter(|task| {
                let target = &task.action.resource_address;
                target == base || target.starts_with(&below)
            })
            .collect())
    }

    /// Delete every task addressed to `address` or to a resource below it.
    /// Returns how many were removed.
    ///
    /// Only the records go; a worker already running one of them is not
    /// told. [`Supervisor::revoke`](crate::Supervisor::revoke) does both.
    pub fn delete_by_resource(&self, address: &str) -> TaskResult<usize> {
        let mut deleted = 0;
        for task in self.by_resource(address)? {
            if self.delete(&task)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn decode(value: String) -> TaskResult<Task> {
    let mut task: Task = serde_json::from_str(&value)?;
    task.snapshot = Some(value);
    Ok(task)
}
