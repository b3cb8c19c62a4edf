//! End-to-end scheduling tests.
//!
//! Each test runs real supervisors against an in-memory coordination store
//! and a scripted provider, so retries, panics and cancellation go through
//! the same poll loop and worker pool the daemon uses.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use keelson_core::{Core, Fault, KeelsonConfig, Node, Resource, ScriptedProvider};
use keelson_store::CoordinationStore;
use keelson_tasks::{Action, Supervisor, Task, TaskResult, TaskStatus, Tasks, identity_of};

const POLL: Duration = Duration::from_millis(10);

fn test_core(max_attempts: u32) -> (Core, Arc<ScriptedProvider>) {
    let mut config = KeelsonConfig::default();
    config.supervisor.max_attempts = max_attempts;
    let provider = Arc::new(ScriptedProvider::new());
    let core = Core::new(
        config,
        CoordinationStore::open_in_memory().unwrap(),
        provider.clone(),
    );
    (core, provider)
}

fn add_node(core: &Core, id: &str) -> Resource {
    let node = Resource::Node(Node::new(id, "m4.large"));
    core.catalog.create(&node).unwrap();
    node
}

fn enqueue(core: &Core, operation: &str, resource: &Resource) -> Task {
    Action::describe(operation, resource)
        .unwrap()
        .supervise(core)
        .unwrap()
}

struct Running {
    supervisor: Arc<Supervisor>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<TaskResult<()>>,
}

fn start(core: &Core, workers: usize) -> Running {
    let supervisor = Arc::new(
        Supervisor::new(core.clone())
            .with_workers(workers)
            .with_poll_interval(POLL),
    );
    let (shutdown, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(shutdown_rx).await }
    });
    Running {
        supervisor,
        shutdown,
        handle,
    }
}

impl Running {
    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Retry semantics ────────────────────────────────────────────────

#[tokio::test]
async fn task_succeeding_on_third_attempt_runs_exactly_three_times() {
    let (core, provider) = test_core(3);
    let node = add_node(&core, "i-1");
    provider.fault_next("delete_server", 2, Fault::Fail("api unavailable".into()));

    enqueue(&core, "delete", &node);
    let running = start(&core, 2);
    let tasks = Tasks::from_core(&core);
    wait_until("task to finish", || tasks.list().unwrap().is_empty()).await;
    running.stop().await;

    assert_eq!(provider.call_count("delete_server"), 3);
    assert!(core.catalog.load(&node.location()).is_err());
}

#[tokio::test]
async fn always_failing_task_is_abandoned_after_its_budget() {
    let (core, provider) = test_core(3);
    let node = add_node(&core, "i-1");
    provider.fault_always("delete_server", Fault::Fail("permission denied".into()));

    let task = enqueue(&core, "delete", &node);
    let running = start(&core, 1);
    let tasks = Tasks::from_core(&core);

    let mut highest_attempts = 0;
    wait_until("task to be abandoned", || match tasks.get(&task.id).unwrap() {
        Some(stored) => {
            highest_attempts = highest_attempts.max(stored.attempts);
            if stored.attempts > 0 {
                assert_eq!(stored.last_error.as_deref(), Some("permission denied"));
            }
            false
        }
        None => true,
    })
    .await;
    running.stop().await;

    // One first attempt plus max_attempts retries.
    assert_eq!(provider.call_count("delete_server"), 4);
    assert!(highest_attempts <= 3);
    // Abandoned work leaves the resource untouched.
    assert!(core.catalog.load(&node.location()).is_ok());
}

#[tokio::test]
async fn vanished_resource_fails_resolution_and_is_abandoned() {
    let (core, provider) = test_core(1);
    let node = add_node(&core, "i-1");
    enqueue(&core, "delete", &node);
    core.catalog.delete(&node.location()).unwrap();

    let running = start(&core, 1);
    let tasks = Tasks::from_core(&core);
    wait_until("task to be abandoned", || tasks.list().unwrap().is_empty()).await;
    running.stop().await;

    assert!(provider.calls().is_empty());
}

// ── Mutual exclusion ───────────────────────────────────────────────

#[tokio::test]
async fn second_enqueue_before_claim_is_duplicate() {
    let (core, _) = test_core(3);
    let node = add_node(&core, "i-1");

    enqueue(&core, "delete", &node);
    let err = Action::describe("delete", &node)
        .unwrap()
        .supervise(&core)
        .unwrap_err();

    assert!(matches!(err, keelson_tasks::TaskError::Duplicate { .. }));
    let pending = Tasks::from_core(&core).list().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, identity_of("delete", "/nodes/i-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_supervisors_run_each_task_once() {
    let (core, provider) = test_core(3);
    // Both startup sweeps must be over before anything is claimed, or one
    // supervisor would delete the other's running tasks as stale.
    let first = start(&core, 2);
    let second = start(&core, 2);
    tokio::time::sleep(POLL * 3).await;

    let ids: Vec<String> = (0..6).map(|n| format!("i-{n}")).collect();
    for id in &ids {
        let node = add_node(&core, id);
        enqueue(&core, "delete", &node);
    }
    let tasks = Tasks::from_core(&core);
    wait_until("all tasks to finish", || tasks.list().unwrap().is_empty()).await;
    first.stop().await;
    second.stop().await;

    let calls = provider.calls();
    for id in &ids {
        let runs = calls
            .iter()
            .filter(|call| **call == format!("delete_server {id}"))
            .count();
        assert_eq!(runs, 1, "node {id} deleted {runs} times");
    }
}

// ── Recovery and cancellation ──────────────────────────────────────

#[tokio::test]
async fn stale_running_tasks_are_swept_at_startup() {
    let (core, provider) = test_core(3);
    let node = add_node(&core, "i-1");
    let tasks = Tasks::from_core(&core);
    let mut task = enqueue(&core, "delete", &node);
    tasks.claim(&mut task).unwrap();
    task.worker_id = Some("worker-7".into());
    tasks.update(&mut task).unwrap();

    let running = start(&core, 1);
    wait_until("stale task sweep", || tasks.list().unwrap().is_empty()).await;
    tokio::time::sleep(POLL * 3).await;
    running.stop().await;

    assert!(provider.calls().is_empty());
    assert!(core.catalog.load(&node.location()).is_ok());
}

#[tokio::test]
async fn revoked_queued_work_never_runs() {
    let (core, provider) = test_core(3);
    let node = add_node(&core, "i-1");
    enqueue(&core, "provision", &node);
    enqueue(&core, "delete", &node);

    let revoker = Supervisor::new(core.clone());
    Action::describe("delete", &node).unwrap().cancel_tasks(&revoker);
    assert!(Tasks::from_core(&core).list().unwrap().is_empty());

    let running = start(&core, 1);
    tokio::time::sleep(POLL * 5).await;
    running.stop().await;
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn cancel_frees_the_worker_and_orphans_the_task() {
    let (core, provider) = test_core(3);
    let stuck = add_node(&core, "i-1");
    let other = add_node(&core, "i-2");
    provider.fault_always("create_server", Fault::Hang);

    let stuck_task = enqueue(&core, "provision", &stuck);
    let running = start(&core, 1);
    let tasks = Tasks::from_core(&core);

    wait_until("stuck task to be picked up", || {
        tasks
            .get(&stuck_task.id)
            .unwrap()
            .is_some_and(|t| t.status == TaskStatus::Running && t.worker_id.is_some())
    })
    .await;

    // Cancelling a queued task is a no-op.
    let queued = enqueue(&core, "delete", &other);
    assert!(!running.supervisor.cancel(&queued).unwrap());

    assert!(running.supervisor.cancel(&stuck_task).unwrap());

    // The only worker is free again, so the queued task gets to run.
    wait_until("queued task to run", || {
        tasks.get(&queued.id).unwrap().is_none()
    })
    .await;
    assert_eq!(provider.call_count("delete_server"), 1);

    // The abandoned task stays Running until the next startup sweep.
    let orphan = tasks.get(&stuck_task.id).unwrap().unwrap();
    assert_eq!(orphan.status, TaskStatus::Running);
    running.stop().await;

    let restarted = Supervisor::new(core.clone());
    assert_eq!(restarted.sweep_stale().unwrap(), 1);
    assert!(tasks.list().unwrap().is_empty());
}

#[tokio::test]
async fn revoking_a_running_task_frees_its_worker() {
    let (core, provider) = test_core(3);
    let stuck = add_node(&core, "i-1");
    let other = add_node(&core, "i-2");
    provider.fault_always("create_server", Fault::Hang);

    let stuck_task = enqueue(&core, "provision", &stuck);
    let running = start(&core, 1);
    let tasks = Tasks::from_core(&core);

    wait_until("stuck task to be picked up", || {
        tasks
            .get(&stuck_task.id)
            .unwrap()
            .is_some_and(|t| t.worker_id.is_some())
    })
    .await;
    let queued = enqueue(&core, "delete", &other);

    Action::describe("delete", &stuck)
        .unwrap()
        .cancel_tasks(&running.supervisor);
    assert!(tasks.get(&stuck_task.id).unwrap().is_none());

    wait_until("queued task to run", || {
        tasks.get(&queued.id).unwrap().is_none()
    })
    .await;
    running.stop().await;

    assert_eq!(provider.call_count("delete_server"), 1);
    assert!(tasks.list().unwrap().is_empty());
}

// ── Panics ─────────────────────────────────────────────────────────

#[tokio::test]
async fn error_panic_is_recorded_and_retried() {
    let (core, provider) = test_core(3);
    let node = add_node(&core, "i-1");
    provider.fault_next(
        "delete_server",
        1,
        Fault::PanicWithError("disk controller exploded".into()),
    );

    let task = enqueue(&core, "delete", &node);
    let running = start(&core, 1);
    let tasks = Tasks::from_core(&core);

    let mut saw_error = None;
    wait_until("task to finish", || match tasks.get(&task.id).unwrap() {
        Some(stored) => {
            if stored.last_error.is_some() {
                saw_error = stored.last_error;
            }
            false
        }
        None => true,
    })
    .await;
    running.stop().await;

    assert_eq!(provider.call_count("delete_server"), 2);
    if let Some(error) = saw_error {
        assert!(error.contains("disk controller exploded"), "{error}");
    }
}

#[tokio::test]
async fn defect_panic_takes_the_supervisor_down() {
    let (core, provider) = test_core(3);
    let node = add_node(&core, "i-1");
    provider.fault_next("delete_server", 1, Fault::Panic("index out of range".into()));

    enqueue(&core, "delete", &node);
    let running = start(&core, 1);

    let joined = tokio::time::timeout(Duration::from_secs(10), running.handle)
        .await
        .expect("supervisor did not stop");
    let err = joined.unwrap_err();
    assert!(err.is_panic());
}
