use super::*;

use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing_test::traced_test;

use crate::entities::{SqliteStore, TaskFilter};
use crate::error::ValidationError;
use crate::intake::FileHandle;
use crate::types::TaskStatus;

// ── fixtures ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Json(Value),
    Error(u16, &'static str),
    Panic,
}

/// Interpreter whose latency and answer are set by the test.
struct FakeInterpreter {
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    reply: Reply,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeInterpreter {
    fn new(reply: Reply) -> Self {
        Self {
            delay: Duration::ZERO,
            gate: None,
            reply,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    fn json(value: Value) -> Self {
        Self::new(Reply::Json(value))
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl Interpreter for FakeInterpreter {
    async fn interpret(&self, _request: &InterpretRequest) -> Result<Value, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        match self.reply.clone() {
            Reply::Json(value) => Ok(value),
            Reply::Error(status, message) => Err(AdapterError::Remote {
                status,
                message: message.to_owned(),
            }),
            Reply::Panic => panic!("interpreter blew up"),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Wraps a real store, fails the next `failures` state writes and answers an
/// insert only `create_ack_delay` after it committed.
struct FlakyStore {
    inner: SqliteStore,
    failures: AtomicUsize,
    create_ack_delay: Duration,
}

impl FlakyStore {
    async fn new(failures: usize) -> Self {
        Self {
            inner: SqliteStore::connect("sqlite::memory:").await.unwrap(),
            failures: AtomicUsize::new(failures),
            create_ack_delay: Duration::ZERO,
        }
    }
}

impl TaskStore for FlakyStore {
    async fn create_task(&self, record: TaskRecord) -> Result<(), sqlx::Error> {
        self.inner.create_task(record).await?;
        tokio::time::sleep(self.create_ack_delay).await;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, sqlx::Error> {
        self.inner.get_task(task_id).await
    }

    async fn update_task_state(
        &self,
        task_id: &str,
        transition: &TaskTransition,
    ) -> Result<u64, sqlx::Error> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(sqlx::Error::PoolTimedOut);
        }
        self.inner.update_task_state(task_id, transition).await
    }

    async fn update_task_content(&self, task_id: &str, content: &str) -> Result<u64, sqlx::Error> {
        self.inner.update_task_content(task_id, content).await
    }

    async fn delete_task(&self, task_id: &str) -> Result<u64, sqlx::Error> {
        self.inner.delete_task(task_id).await
    }

    async fn delete_tasks(&self, task_ids: &[String]) -> Result<u64, sqlx::Error> {
        self.inner.delete_tasks(task_ids).await
    }

    async fn query_tasks(
        &self,
        filter: &TaskFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<TaskRecord>, u64), sqlx::Error> {
        self.inner.query_tasks(filter, page, page_size).await
    }

    async fn interrupt_active_tasks(&self, reason: &str) -> Result<u64, sqlx::Error> {
        self.inner.interrupt_active_tasks(reason).await
    }
}

fn config() -> RunnerConfig {
    RunnerConfig {
        max_concurrent_tasks: 4,
        interpret_timeout: Duration::from_secs(5),
        progress_interval: Duration::from_millis(20),
        store_retry_delay: Duration::from_millis(5),
    }
}

fn handles() -> HandleSet {
    HandleSet {
        primary: FileHandle {
            path: PathBuf::from("/staged/k/contract.pdf"),
            original_name: "contract.pdf".into(),
            content_type: Some("application/pdf".into()),
            size_bytes: 10,
        },
        supplementary: vec![FileHandle {
            path: PathBuf::from("/staged/k/quote_1.png"),
            original_name: "quote.png".into(),
            content_type: None,
            size_bytes: 4,
        }],
    }
}

fn task(name: &str) -> NewTask {
    NewTask::new(name, "acme", "medical")
}

async fn setup_with(
    interpreter: Arc<FakeInterpreter>,
    config: RunnerConfig,
) -> (Arc<SqliteStore>, TaskRunner<SqliteStore>) {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    let runner = TaskRunner::new(store.clone(), interpreter, config, IntakeLimits::default());
    (store, runner)
}

async fn setup(interpreter: Arc<FakeInterpreter>) -> (Arc<SqliteStore>, TaskRunner<SqliteStore>) {
    setup_with(interpreter, config()).await
}

/// Poll until `done` holds for the task, failing the test after 5 s.
async fn wait_for<S: TaskStore>(
    store: &S,
    task_id: &str,
    done: impl Fn(&TaskRecord) -> bool,
) -> TaskRecord {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = store.get_task(task_id).await.unwrap() {
            if done(&record) {
                return record;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting on {task_id}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_terminal<S: TaskStore>(store: &S, task_id: &str) -> TaskRecord {
    wait_for(store, task_id, |r| r.status.is_terminal()).await
}

async fn wait_idle<S: TaskStore>(runner: &TaskRunner<S>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while runner.in_flight() > 0 {
        assert!(Instant::now() < deadline, "executions did not finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── tests ────────────────────────────────────────────────────────────────────

#[test]
fn task_ids_have_the_expected_shape() {
    let id = new_task_id();
    assert_eq!(id.len(), 1 + 14 + 12);
    assert!(id.starts_with('T'));
    assert!(id[1..15].chars().all(|c| c.is_ascii_digit()));
    assert!(id[15..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    assert_ne!(new_task_id(), new_task_id());
}

#[test]
fn empty_payloads_are_detected() {
    assert!(is_empty_payload(&Value::Null));
    assert!(is_empty_payload(&json!({})));
    assert!(is_empty_payload(&json!("  ")));
    assert!(!is_empty_payload(&json!({"risk": "low"})));
    assert!(!is_empty_payload(&json!(0)));
}

#[tokio::test]
async fn submit_returns_before_a_slow_interpreter() {
    let gate = Arc::new(Semaphore::new(0));
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": true})).gated(gate.clone()));
    let (store, runner) = setup(fake).await;

    let started = Instant::now();
    let task_id = runner.submit(task("slow"), handles()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));

    let record = store.get_task(&task_id).await.unwrap().unwrap();
    assert!(matches!(record.status, TaskStatus::Pending | TaskStatus::Processing));
    assert!(record.result_content.is_none());
    assert!(record.input_data.unwrap().contains("contract.pdf"));

    gate.add_permits(1);
    let done = wait_terminal(store.as_ref(), &task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn success_completes_with_full_progress() {
    let fake = Arc::new(FakeInterpreter::json(json!({"risk": "low"})));
    let (store, runner) = setup(fake.clone()).await;

    let task_id = runner.submit(task("ok"), handles()).await.unwrap();
    let done = wait_terminal(store.as_ref(), &task_id).await;

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100);
    let result: Value = serde_json::from_str(done.result_content.as_deref().unwrap()).unwrap();
    assert_eq!(result, json!({"risk": "low"}));
    assert!(done.error_msg.is_none());
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interpreter_error_fails_the_task() {
    let fake = Arc::new(FakeInterpreter::new(Reply::Error(500, "boom")));
    let (store, runner) = setup(fake).await;

    let task_id = runner.submit(task("bad"), handles()).await.unwrap();
    let done = wait_terminal(store.as_ref(), &task_id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.result_content.is_none());
    assert_eq!(
        done.error_msg.as_deref(),
        Some("interpreter returned error: 500 - boom")
    );
    assert!(done.progress >= PROGRESS_STARTED && done.progress < 100);
}

#[tokio::test]
async fn empty_result_is_malformed() {
    let fake = Arc::new(FakeInterpreter::json(Value::Null));
    let (store, runner) = setup(fake).await;

    let task_id = runner.submit(task("null"), handles()).await.unwrap();
    let done = wait_terminal(store.as_ref(), &task_id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error_msg.unwrap().starts_with("malformed interpretation response"));
}

#[tokio::test]
async fn slow_interpreter_times_out() {
    let gate = Arc::new(Semaphore::new(0));
    let fake = Arc::new(FakeInterpreter::json(json!({"late": true})).gated(gate));
    let config = RunnerConfig {
        interpret_timeout: Duration::from_millis(50),
        ..config()
    };
    let (store, runner) = setup_with(fake, config).await;

    let task_id = runner.submit(task("stuck"), handles()).await.unwrap();
    let done = wait_terminal(store.as_ref(), &task_id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(
        done.error_msg.as_deref(),
        Some("interpretation timed out after 50ms")
    );
}

#[tokio::test]
async fn progress_only_moves_forward_and_stops_at_the_heartbeat_ceiling() {
    let gate = Arc::new(Semaphore::new(0));
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})).gated(gate.clone()));
    let config = RunnerConfig {
        progress_interval: Duration::from_millis(2),
        ..config()
    };
    let (store, runner) = setup_with(fake, config).await;
    let task_id = runner.submit(task("beat"), handles()).await.unwrap();

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let record = store.get_task(&task_id).await.unwrap().unwrap();
        seen.push(record.progress);
        if record.progress == PROGRESS_HEARTBEAT_CEILING {
            break;
        }
        assert!(Instant::now() < deadline, "heartbeat never reached the ceiling");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // Still blocked: heartbeats must not push past the ceiling.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let record = store.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Processing);
    assert_eq!(record.progress, PROGRESS_HEARTBEAT_CEILING);

    gate.add_permits(1);
    let done = wait_terminal(store.as_ref(), &task_id).await;
    seen.push(done.progress);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(done.progress, 100);
}

#[tokio::test]
async fn duplicate_identity_is_rejected_while_active() {
    let gate = Arc::new(Semaphore::new(0));
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})).gated(gate.clone()));
    let (store, runner) = setup(fake.clone()).await;

    let first = runner.submit(task("order"), handles()).await.unwrap();
    let err = runner.submit(task("order"), handles()).await.unwrap_err();
    assert!(matches!(err, CoreError::DuplicateTask { ref task_name, .. } if task_name == "order"));

    // Same name for another company is a different identity.
    let other = runner
        .submit(NewTask::new("order", "globex", "medical"), handles())
        .await
        .unwrap();

    gate.add_permits(2);
    wait_terminal(store.as_ref(), &first).await;
    wait_terminal(store.as_ref(), &other).await;
    wait_idle(&runner).await;

    // Terminal tasks free their identity.
    let again = runner.submit(task("order"), handles()).await.unwrap();
    assert_ne!(again, first);
    gate.add_permits(1);
    wait_terminal(store.as_ref(), &again).await;
    assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn database_guard_catches_duplicates_from_another_process() {
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})));
    let (store, runner) = setup(fake).await;

    // A row written by someone else, invisible to this runner's registry.
    store
        .create_task(TaskRecord::pending("TFOREIGN", &task("shared"), None))
        .await
        .unwrap();

    let err = runner.submit(task("shared"), handles()).await.unwrap_err();
    assert!(matches!(err, CoreError::DuplicateTask { .. }));
    assert_eq!(runner.in_flight(), 0);
}

#[tokio::test]
async fn invalid_handles_create_no_row() {
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})));
    let (store, runner) = setup(fake.clone()).await;

    let mut bad = handles();
    bad.supplementary[0].original_name = "quote.gif".into();
    let err = runner.submit(task("bad"), bad).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::WrongType { .. })
    ));

    let (rows, total) = store
        .query_tasks(&TaskFilter::default(), 1, 10)
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert_eq!(total, 0);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[traced_test]
async fn deleting_a_processing_task_is_harmless() {
    let gate = Arc::new(Semaphore::new(0));
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})).gated(gate.clone()));
    let (store, runner) = setup(fake).await;

    let doomed = runner.submit(task("doomed"), handles()).await.unwrap();
    let survivor = runner.submit(task("survivor"), handles()).await.unwrap();
    wait_for(store.as_ref(), &doomed, |r| r.status == TaskStatus::Processing).await;

    assert_eq!(store.delete_task(&doomed).await.unwrap(), 1);
    gate.add_permits(2);

    let done = wait_terminal(store.as_ref(), &survivor).await;
    assert_eq!(done.status, TaskStatus::Completed);
    wait_idle(&runner).await;

    assert!(store.get_task(&doomed).await.unwrap().is_none());
    assert!(logs_contain("abandoning"));
}

#[tokio::test]
async fn deleting_a_task_past_the_heartbeat_ceiling_frees_its_identity() {
    let gate = Arc::new(Semaphore::new(0));
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})).gated(gate.clone()));
    let config = RunnerConfig {
        progress_interval: Duration::from_millis(2),
        ..config()
    };
    let (store, runner) = setup_with(fake, config).await;

    let first = runner.submit(task("stuck"), handles()).await.unwrap();
    wait_for(store.as_ref(), &first, |r| r.progress == PROGRESS_HEARTBEAT_CEILING).await;
    assert_eq!(store.delete_task(&first).await.unwrap(), 1);

    // The interpreter call is still blocked, yet the execution notices the
    // deletion on its next heartbeat.
    wait_idle(&runner).await;
    let second = runner.submit(task("stuck"), handles()).await.unwrap();
    gate.add_permits(1);
    let done = wait_terminal(store.as_ref(), &second).await;
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn abandoned_submit_still_runs_the_task() {
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})));
    let mut flaky = FlakyStore::new(0).await;
    flaky.create_ack_delay = Duration::from_millis(200);
    let store = Arc::new(flaky);
    let runner = TaskRunner::new(store.clone(), fake, config(), IntakeLimits::default());

    // The caller gives up after the insert committed but before it was acked.
    let dropped =
        tokio::time::timeout(Duration::from_millis(50), runner.submit(task("policy"), handles())).await;
    assert!(dropped.is_err());

    let filter = TaskFilter {
        task_name_contains: Some("policy".into()),
        ..Default::default()
    };
    let (rows, total) = store.query_tasks(&filter, 1, 10).await.unwrap();
    assert_eq!(total, 1);
    let done = wait_terminal(store.as_ref(), &rows[0].task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100);

    wait_idle(&runner).await;
    let again = runner.submit(task("policy"), handles()).await.unwrap();
    let done = wait_terminal(store.as_ref(), &again).await;
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let fake = Arc::new(
        FakeInterpreter::json(json!({"ok": 1})).delayed(Duration::from_millis(30)),
    );
    let config = RunnerConfig {
        max_concurrent_tasks: 2,
        ..config()
    };
    let (store, runner) = setup_with(fake.clone(), config).await;

    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(runner.submit(task(&format!("batch {i}")), handles()).await.unwrap());
    }
    for id in &ids {
        let done = wait_terminal(store.as_ref(), id).await;
        assert_eq!(done.status, TaskStatus::Completed);
    }

    assert_eq!(fake.calls.load(Ordering::SeqCst), 6);
    assert!(fake.max_running.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn a_single_store_failure_is_retried() {
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})));
    let store = Arc::new(FlakyStore::new(1).await);
    let runner = TaskRunner::new(store.clone(), fake, config(), IntakeLimits::default());

    let task_id = runner.submit(task("flaky"), handles()).await.unwrap();
    let done = wait_terminal(store.as_ref(), &task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn a_persistent_store_failure_fails_the_task() {
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})));
    let store = Arc::new(FlakyStore::new(2).await);
    let runner = TaskRunner::new(store.clone(), fake.clone(), config(), IntakeLimits::default());

    let task_id = runner.submit(task("broken"), handles()).await.unwrap();
    let done = wait_terminal(store.as_ref(), &task_id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error_msg.unwrap().starts_with("internal error:"));
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn a_panicking_execution_is_recorded_as_failed() {
    let fake = Arc::new(FakeInterpreter::new(Reply::Panic));
    let (store, runner) = setup(fake).await;

    let task_id = runner.submit(task("panic"), handles()).await.unwrap();
    let done = wait_terminal(store.as_ref(), &task_id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_msg.as_deref(), Some(REASON_PANIC));

    wait_idle(&runner).await;
    // The identity is free again.
    runner.submit(task("panic"), handles()).await.unwrap();
}

#[tokio::test]
async fn shutdown_interrupts_live_tasks() {
    let gate = Arc::new(Semaphore::new(0));
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})).gated(gate));
    let (store, runner) = setup(fake).await;

    let a = runner.submit(task("a"), handles()).await.unwrap();
    let b = runner.submit(task("b"), handles()).await.unwrap();
    wait_for(store.as_ref(), &a, |r| r.status == TaskStatus::Processing).await;
    wait_for(store.as_ref(), &b, |r| r.status == TaskStatus::Processing).await;
    assert_eq!(runner.in_flight(), 2);

    runner.shutdown().await;
    for id in [&a, &b] {
        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_msg.as_deref(), Some(REASON_SHUTDOWN));
    }
    wait_idle(&runner).await;

    let err = runner.submit(task("late"), handles()).await.unwrap_err();
    assert!(matches!(err, CoreError::Internal(_)));
}

#[tokio::test]
async fn execution_that_starts_after_shutdown_fails_its_task() {
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})));
    let (store, runner) = setup(fake.clone()).await;

    // A submit that passed the closed check just before shutdown began.
    runner.inner.permits.close();
    let task_id = runner.submit(task("late"), handles()).await.unwrap();

    let done = wait_terminal(store.as_ref(), &task_id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_msg.as_deref(), Some(REASON_SHUTDOWN));
    assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    wait_idle(&runner).await;
}

#[tokio::test]
async fn recovery_fails_tasks_left_by_a_previous_process() {
    let fake = Arc::new(FakeInterpreter::json(json!({"ok": 1})));
    let (store, runner) = setup(fake).await;
    store
        .create_task(TaskRecord::pending("TOLD", &task("stale"), None))
        .await
        .unwrap();

    assert_eq!(runner.recover_interrupted().await.unwrap(), 1);
    let record = store.get_task("TOLD").await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.error_msg.as_deref(), Some(REASON_RESTART));

    // The stale identity no longer blocks new submissions.
    let task_id = runner.submit(task("stale"), handles()).await.unwrap();
    wait_terminal(store.as_ref(), &task_id).await;
}
