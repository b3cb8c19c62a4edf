//! The scheduling loop.
//!
//! On startup the supervisor deletes tasks left `Running` by a previous
//! process. It then polls the task collection on a fixed interval, claims
//! the first queued task with a compare-and-swap and hands it to a worker.
//!
//! ```text
//! Supervisor::run
//!   ├── sweep stale Running tasks
//!   ├── spawn N workers (shared dispatch queue, one cancel channel each)
//!   └── every tick:
//!         wait for a free worker slot
//!         list → first Queued → claim (CAS) → dispatch
//! ```
//!
//! A worker slot is reserved before claiming, so a claimed task never sits
//! in memory waiting for a busy pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use keelson_core::Core;

use crate::error::{TaskError, TaskResult};
use crate::task::{Task, TaskStatus, Tasks};
use crate::worker::{Dispatch, Worker};

pub struct Supervisor {
    /// Distinguishes this supervisor's workers from those of any other
    /// supervisor sharing the store.
    instance_id: String,
    core: Core,
    tasks: Tasks,
    workers: usize,
    poll_interval: Duration,
    /// Cancellation channels of the running workers, by worker id.
    cancels: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl Supervisor {
    /// Build a supervisor sized from the `[supervisor]` configuration.
    pub fn new(core: Core) -> Self {
        let settings = core.config.supervisor.clone();
        Self {
            instance_id: Uuid::new_v4().simple().to_string(),
            tasks: Tasks::from_core(&core),
            core,
            workers: settings.workers.max(1),
            poll_interval: settings.poll_interval(),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn tasks(&self) -> &Tasks {
        &self.tasks
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Delete every task left `Running` by a previous process. The work
    /// they stood for is lost; whoever queued it must queue it again.
    pub fn sweep_stale(&self) -> TaskResult<usize> {
        let mut swept = 0;
        for task in self.tasks.list()? {
            if task.status != TaskStatus::Running {
                continue;
            }
            warn!(
                task_id = %task.id,
                operation = %task.action.operation_name,
                address = %task.action.resource_address,
                worker_id = task.worker_id.as_deref().unwrap_or(""),
                "deleting stale running task"
            );
            if self.tasks.delete(&task)? {
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Run the sweep, the worker pool and the poll loop until `shutdown`
    /// fires.
    ///
    /// Returns an error if a worker could not persist a task outcome. A
    /// worker that panics with anything other than an `anyhow::Error`
    /// brings the supervisor down with the same panic.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> TaskResult<()> {
        let swept = self.sweep_stale()?;
        if swept > 0 {
            warn!(swept, "stale tasks removed at startup");
        }

        let slots = Arc::new(Semaphore::new(self.workers));
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<Dispatch>(self.workers);
        let queue = Arc::new(tokio::sync::Mutex::new(dispatch_rx));

        let mut pool = JoinSet::new();
        for n in 0..self.workers {
            let id = format!("{}-worker-{n}", self.instance_id);
            let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
            self.lock_cancels().insert(id.clone(), cancel_tx);
            let worker = Worker::new(
                id,
                self.core.clone(),
                self.tasks.clone(),
                queue.clone(),
                cancel_rx,
            );
            pool.spawn(worker.run());
        }

        info!(
            instance_id = %self.instance_id,
            workers = self.workers,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "supervisor started"
        );

        let result = loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break Ok(()),
                Some(exited) = pool.join_next() => match worker_exited(exited) {
                    Ok(()) => continue,
                    Err(e) => break Err(e),
                },
            }

            let permit = tokio::select! {
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Err(TaskError::WorkersStopped),
                },
                _ = shutdown.changed() => break Ok(()),
                Some(exited) = pool.join_next() => match worker_exited(exited) {
                    Ok(()) => continue,
                    Err(e) => break Err(e),
                },
            };

            if let Err(e) = self.poll_once(&dispatch_tx, permit).await {
                error!(error = %e, "poll failed");
            }
        };

        drop(dispatch_tx);
        pool.shutdown().await;
        self.lock_cancels().clear();
        match &result {
            Ok(()) => info!("supervisor stopped"),
            Err(e) => error!(error = %e, "supervisor stopped on fatal error"),
        }
        result
    }

    /// One scheduling step: claim the first queued task and dispatch it on
    /// the reserved worker slot. Does nothing if no task is queued.
    async fn poll_once(
        &self,
        dispatch: &mpsc::Sender<Dispatch>,
        permit: OwnedSemaphorePermit,
    ) -> TaskResult<()> {
        let next = self
            .tasks
            .list()?
            .into_iter()
            .find(|task| task.status == TaskStatus::Queued);
        let Some(mut task) = next else {
            return Ok(());
        };

        match self.tasks.claim(&mut task) {
            Ok(()) => {}
            Err(TaskError::ClaimLost(id)) => {
                warn!(task_id = %id, "task claimed by another supervisor, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        debug!(
            task_id = %task.id,
            operation = %task.action.operation_name,
            address = %task.action.resource_address,
            "task claimed"
        );

        dispatch
            .send(Dispatch { task, permit })
            .await
            .map_err(|_| TaskError::WorkersStopped)
    }

    /// Ask the worker running `task` to stop waiting for it.
    ///
    /// Cancellation only frees the worker; the operation itself is not
    /// interrupted and the task stays `Running` until the next startup
    /// sweep. Returns true if a worker was signalled.
    pub fn cancel(&self, task: &Task) -> TaskResult<bool> {
        let current = match self.tasks.get(&task.id)? {
            Some(current) if current.status == TaskStatus::Running => current,
            _ => {
                info!(task_id = %task.id, "cancel requested for task that is not running");
                return Ok(false);
            }
        };
        let Some(worker_id) = current.worker_id else {
            info!(task_id = %task.id, "cancel requested before a worker picked the task up");
            return Ok(false);
        };

        let signalled = self
            .lock_cancels()
            .get(&worker_id)
            .is_some_and(|tx| tx.send(task.id.clone()).is_ok());
        if signalled {
            warn!(task_id = %task.id, %worker_id, "cancellation sent");
        } else {
            warn!(task_id = %task.id, %worker_id, "no such worker in this supervisor");
        }
        Ok(signalled)
    }

    /// Revoke every task on the resource at `address` or below it.
    ///
    /// Running tasks held by this supervisor's workers are cancelled first,
    /// so those workers go back to the pool; then every matching record is
    /// deleted. Returns how many records were removed.
    pub fn revoke(&self, address: &str) -> TaskResult<usize> {
        let mut revoked = 0;
        for task in self.tasks.by_resource(address)? {
            if task.status == TaskStatus::Running {
                self.cancel(&task)?;
            }
            if self.tasks.delete(&task)? {
                revoked += 1;
            }
        }
        if revoked > 0 {
            info!(%address, revoked, "tasks revoked");
        }
        Ok(revoked)
    }

    fn lock_cancels(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<String>>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decide what a worker leaving the pool means for the supervisor.
fn worker_exited(exited: Result<TaskResult<()>, JoinError>) -> TaskResult<()> {
    match exited {
        Ok(Ok(())) => {
            warn!("worker exited");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            warn!(error = %e, "worker aborted");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use keelson_core::{KeelsonConfig, Node, Resource, ScriptedProvider};
    use keelson_store::CoordinationStore;

    use super::*;
    use crate::action::Action;

    fn test_supervisor() -> Supervisor {
        let mut config = KeelsonConfig::default();
        config.supervisor.workers = 0;
        config.supervisor.poll_interval_ms = 250;
        let core = Core::new(
            config,
            CoordinationStore::open_in_memory().unwrap(),
            Arc::new(ScriptedProvider::new()),
        );
        Supervisor::new(core)
    }

    fn enqueue(supervisor: &Supervisor, node_id: &str) -> Task {
        let node = Resource::Node(Node::new(node_id, "m4.large"));
        supervisor.core.catalog.create(&node).unwrap();
        Action::describe("delete", &node)
            .unwrap()
            .supervise(&supervisor.core)
            .unwrap()
    }

    #[test]
    fn settings_come_from_config() {
        let supervisor = test_supervisor();
        assert_eq!(supervisor.workers, 1);
        assert_eq!(supervisor.poll_interval, Duration::from_millis(250));

        let supervisor = supervisor.with_workers(3);
        assert_eq!(supervisor.workers, 3);
    }

    #[test]
    fn instance_ids_are_unique() {
        let first = test_supervisor();
        let second = test_supervisor();
        assert_eq!(first.instance_id().len(), 32);
        assert_ne!(first.instance_id(), second.instance_id());
    }

    #[test]
    fn cancel_only_reaches_own_workers() {
        let supervisor = test_supervisor();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let own = format!("{}-worker-0", supervisor.instance_id());
        supervisor.lock_cancels().insert(own.clone(), tx);

        let mut task = enqueue(&supervisor, "i-1");
        supervisor.tasks.claim(&mut task).unwrap();
        task.worker_id = Some("0123abcd-worker-0".into());
        supervisor.tasks.update(&mut task).unwrap();
        assert!(!supervisor.cancel(&task).unwrap());
        assert!(rx.try_recv().is_err());

        task.worker_id = Some(own);
        supervisor.tasks.update(&mut task).unwrap();
        assert!(supervisor.cancel(&task).unwrap());
        assert_eq!(rx.try_recv().unwrap(), task.id);
    }

    #[test]
    fn revoke_deletes_queued_and_running_tasks_below_the_address() {
        let supervisor = test_supervisor();
        let mut running = enqueue(&supervisor, "i-1");
        enqueue(&supervisor, "i-2");
        supervisor.tasks.claim(&mut running).unwrap();

        assert_eq!(supervisor.revoke("/nodes").unwrap(), 2);
        assert!(supervisor.tasks.list().unwrap().is_empty());
        assert!(supervisor.revoke("/").is_err());
    }

    #[test]
    fn sweep_removes_only_running_tasks() {
        let supervisor = test_supervisor();
        let mut running = enqueue(&supervisor, "i-1");
        let queued = enqueue(&supervisor, "i-2");
        supervisor.tasks.claim(&mut running).unwrap();

        assert_eq!(supervisor.sweep_stale().unwrap(), 1);
        let left = supervisor.tasks.list().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, queued.id);
    }

    #[tokio::test]
    async fn poll_once_claims_first_queued_task() {
        let supervisor = test_supervisor();
        let task = enqueue(&supervisor, "i-1");
        let (tx, mut rx) = mpsc::channel(1);
        let permit = Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap();

        supervisor.poll_once(&tx, permit).await.unwrap();

        let dispatched = rx.recv().await.unwrap();
        assert_eq!(dispatched.task.id, task.id);
        assert_eq!(dispatched.task.status, TaskStatus::Running);
        assert_eq!(
            supervisor.tasks.get(&task.id).unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn poll_once_without_queued_tasks_releases_the_slot() {
        let supervisor = test_supervisor();
        let slots = Arc::new(Semaphore::new(1));
        let (tx, mut rx) = mpsc::channel(1);

        let permit = slots.clone().acquire_owned().await.unwrap();
        supervisor.poll_once(&tx, permit).await.unwrap();

        assert_eq!(slots.available_permits(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cancel_ignores_tasks_without_a_worker() {
        let supervisor = test_supervisor();
        let mut task = enqueue(&supervisor, "i-1");
        assert!(!supervisor.cancel(&task).unwrap());

        supervisor.tasks.claim(&mut task).unwrap();
        assert!(!supervisor.cancel(&task).unwrap());

        task.worker_id = Some("worker-9".into());
        supervisor.tasks.update(&mut task).unwrap();
        assert!(!supervisor.cancel(&task).unwrap());
    }
}
