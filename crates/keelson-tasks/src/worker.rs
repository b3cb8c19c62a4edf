//! Workers run one claimed task at a time.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, mpsc};
use tracing::{debug, info, warn};

use keelson_core::Core;

use crate::error::{TaskError, TaskResult};
use crate::task::{Task, Tasks};

/// A claimed task on its way to a worker. The permit is the worker slot the
/// supervisor reserved before claiming; it is released when the worker is
/// done with the task.
pub(crate) struct Dispatch {
    pub task: Task,
    pub permit: OwnedSemaphorePermit,
}

pub(crate) type DispatchQueue = Arc<Mutex<mpsc::Receiver<Dispatch>>>;

pub(crate) struct Worker {
    id: String,
    core: Core,
    tasks: Tasks,
    queue: DispatchQueue,
    /// Ids of tasks the supervisor wants this worker to stop waiting on.
    cancel: mpsc::UnboundedReceiver<String>,
}

impl Worker {
    pub(crate) fn new(
        id: String,
        core: Core,
        tasks: Tasks,
        queue: DispatchQueue,
        cancel: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            id,
            core,
            tasks,
            queue,
            cancel,
        }
    }

    /// Consume tasks until the dispatch queue closes.
    ///
    /// Returns an error only when the outcome of a task could not be
    /// persisted; the supervisor treats that as fatal.
    pub(crate) async fn run(mut self) -> TaskResult<()> {
        debug!(worker_id = %self.id, "worker started");
        loop {
            let next = self.queue.lock().await.recv().await;
            let Some(Dispatch { task, permit }) = next else {
                debug!(worker_id = %self.id, "dispatch queue closed, worker stopping");
                return Ok(());
            };
            self.execute(task).await?;
            drop(permit);
        }
    }

    async fn execute(&mut self, mut task: Task) -> TaskResult<()> {
        // Anything already waiting was meant for an earlier task.
        while self.cancel.try_recv().is_ok() {}

        task.worker_id = Some(self.id.clone());
        if let Err(e) = self.tasks.update(&mut task) {
            return self.persistence_failure(&task, e);
        }

        let mut action = task.action.clone();
        if let Err(e) = action.initialize(&self.core) {
            return self.record_failure(&mut task, &e.to_string());
        }

        debug!(
            worker_id = %self.id,
            task_id = %task.id,
            operation = %action.operation_name,
            address = %action.resource_address,
            attempt = task.attempts + 1,
            "performing action"
        );

        let mut handle = tokio::spawn(async move { action.perform().await });
        let outcome = tokio::select! {
            joined = &mut handle => joined,
            () = wait_for_cancel(&mut self.cancel, &task.id) => {
                warn!(
                    worker_id = %self.id,
                    task_id = %task.id,
                    "task cancelled, abandoning it"
                );
                return Ok(());
            }
        };

        match outcome {
            Ok(Ok(())) => {
                if let Err(e) = self.tasks.delete(&task) {
                    return self.persistence_failure(&task, e);
                }
                info!(
                    worker_id = %self.id,
                    task_id = %task.id,
                    operation = %task.action.operation_name,
                    address = %task.action.resource_address,
                    "task completed"
                );
                Ok(())
            }
            Ok(Err(e)) => self.record_failure(&mut task, &format!("{e:#}")),
            Err(join_error) if join_error.is_panic() => {
                match join_error.into_panic().downcast::<anyhow::Error>() {
                    Ok(e) => self.record_failure(&mut task, &format!("panicked: {e:#}")),
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
            Err(join_error) => self.record_failure(&mut task, &join_error.to_string()),
        }
    }

    fn record_failure(&self, task: &mut Task, message: &str) -> TaskResult<()> {
        match self.tasks.record_error(task, message) {
            Ok(_) => Ok(()),
            Err(e) => self.persistence_failure(task, e),
        }
    }

    /// A task that was revoked while running has nothing left to record.
    /// Any other failure leaves the stored task in an unknown state.
    fn persistence_failure(&self, task: &Task, error: TaskError) -> TaskResult<()> {
        if error.is_not_found() {
            warn!(
                worker_id = %self.id,
                task_id = %task.id,
                "task was revoked while running, outcome dropped"
            );
            return Ok(());
        }
        Err(TaskError::Persistence {
            id: task.id.clone(),
            source: Box::new(error),
        })
    }
}

/// Resolve once `task_id` is cancelled. Signals for other tasks are stale
/// and dropped.
async fn wait_for_cancel(cancel: &mut mpsc::UnboundedReceiver<String>, task_id: &str) {
    loop {
        match cancel.recv().await {
            Some(id) if id == task_id => return,
            Some(id) => debug!(task_id = %id, "ignoring stale cancellation"),
            None => std::future::pending::<()>().await,
        }
    }
}
