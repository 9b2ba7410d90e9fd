//! Task runner: accepts submissions and drives each one to a terminal state
//! on its own tokio task.
//!
//! # Lifecycle
//!
//! ```text
//! submit ──► Pending ──(permit)──► Processing 5 ─► … 85 ─► 90 ─► Completed 100
//!                │                      │
//!                └──────────────────────┴──► Failed (reason, progress kept)
//! ```
//!
//! Every write for one task is issued from that task's execution unit, so the
//! writes are totally ordered. The store rejects any write that does not follow
//! a valid edge, and a write that changes no row (the task was deleted or is
//! already terminal) ends the execution quietly.

mod registry;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{IntakeLimits, RunnerConfig};
use crate::entities::{is_active_identity_conflict, TaskRecord, TaskStore};
use crate::error::{AdapterError, CoreError};
use crate::intake::HandleSet;
use crate::interpreter::{InterpretRequest, Interpreter};
use crate::types::{NewTask, TaskTransition};

use registry::{Registry, Reservation};

/// Progress written when the interpreter call starts.
pub const PROGRESS_STARTED: u8 = 5;
/// Heartbeat increment while the call is pending.
pub const PROGRESS_STEP: u8 = 5;
/// Heartbeats never push progress past this value.
pub const PROGRESS_HEARTBEAT_CEILING: u8 = 85;
/// Progress written once the call has returned.
pub const PROGRESS_RETURNED: u8 = 90;

pub const REASON_RESTART: &str = "interrupted by server restart";
pub const REASON_SHUTDOWN: &str = "interrupted by server shutdown";
pub const REASON_PANIC: &str = "internal error: execution panicked";

/// Result of one state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Applied,
    /// No row changed: the task is gone or already terminal.
    Skipped,
    /// The store failed twice.
    Failed,
}

struct Inner<S> {
    store: Arc<S>,
    interpreter: Arc<dyn Interpreter>,
    config: RunnerConfig,
    limits: IntakeLimits,
    permits: Arc<Semaphore>,
    registry: Arc<Registry>,
    closed: AtomicBool,
}

/// Schedules interpretation tasks. Cheap to clone.
pub struct TaskRunner<S: TaskStore> {
    inner: Arc<Inner<S>>,
}

impl<S: TaskStore> Clone for TaskRunner<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: TaskStore> std::fmt::Debug for TaskRunner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("interpreter", &self.inner.interpreter.name())
            .field("registry", &self.inner.registry)
            .field("available_permits", &self.inner.permits.available_permits())
            .finish()
    }
}

impl<S: TaskStore> TaskRunner<S> {
    pub fn new(
        store: Arc<S>,
        interpreter: Arc<dyn Interpreter>,
        config: RunnerConfig,
        limits: IntakeLimits,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            inner: Arc::new(Inner {
                store,
                interpreter,
                config,
                limits,
                permits,
                registry: Arc::new(Registry::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Fail every task a previous process left `pending` or `processing`.
    pub async fn recover_interrupted(&self) -> Result<u64, CoreError> {
        let count = self.inner.store.interrupt_active_tasks(REASON_RESTART).await?;
        if count > 0 {
            warn!(count, "marked tasks interrupted by restart as failed");
        }
        Ok(count)
    }

    /// Create a `Pending` task for `handles` and start its execution.
    ///
    /// Returns as soon as the row is durable; the interpreter is never called
    /// on this path.
    pub async fn submit(&self, task: NewTask, handles: HandleSet) -> Result<String, CoreError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CoreError::Internal("task runner is shutting down".into()));
        }
        handles.validate(&self.inner.limits)?;

        let identity = task.identity();
        let task_id = new_task_id();
        if !self.inner.registry.reserve(identity.clone(), &task_id) {
            return Err(duplicate(&task));
        }
        let reservation = Reservation::new(self.inner.registry.clone(), identity.clone(), task_id.clone());

        let input_data = match serde_json::to_string(&handles) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "failed to serialize handle set");
                None
            }
        };

        let record = TaskRecord::pending(task_id.clone(), &task, input_data);
        let request = InterpretRequest {
            task_id: task_id.clone(),
            task_name: task.task_name.clone(),
            company: task.company.clone(),
            scene: task.scene.clone(),
            handles,
        };

        // Insert and execution share one detached unit: once the row exists its
        // execution runs even if the caller stops waiting.
        let (created_tx, created_rx) = oneshot::channel();
        let span = info_span!("task", task_id = %task_id);
        let runner = self.clone();
        let handle = tokio::spawn(
            async move {
                match runner.inner.store.create_task(record).await {
                    Ok(()) => {
                        if created_tx.send(Ok(())).is_err() {
                            debug!("submitter went away; executing anyway");
                        }
                        runner.execute(request).await;
                        drop(reservation);
                    }
                    Err(e) => {
                        drop(reservation);
                        if created_tx.send(Err(e)).is_err() {
                            debug!("submitter went away before the insert failed");
                        }
                    }
                }
            }
            .instrument(span),
        );
        self.inner
            .registry
            .attach(&identity, &task_id, handle.abort_handle());

        match created_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if is_active_identity_conflict(&e) => return Err(duplicate(&task)),
            Ok(Err(e)) => return Err(CoreError::Store(e)),
            Err(_) => {
                return Err(CoreError::Internal(
                    "task creation was interrupted by shutdown".into(),
                ));
            }
        }

        info!(task_id = %task_id, "task submitted");
        Ok(task_id)
    }

    /// Number of executions that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    /// Stop accepting work, abort every live execution and mark its task
    /// failed.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();

        let live = self.inner.registry.snapshot();
        for (_, handle) in &live {
            if let Some(handle) = handle {
                handle.abort();
            }
        }

        let failed = TaskTransition::Failed {
            reason: REASON_SHUTDOWN.to_owned(),
        };
        for (task_id, _) in &live {
            match self.inner.store.update_task_state(task_id, &failed).await {
                Ok(_) => debug!(task_id = %task_id, "task interrupted by shutdown"),
                Err(e) => error!(task_id = %task_id, error = %e, "failed to mark interrupted task"),
            }
        }
        if !live.is_empty() {
            info!(count = live.len(), "aborted in-flight tasks");
        }
    }

    async fn execute(&self, request: InterpretRequest) {
        let outcome = AssertUnwindSafe(self.run(&request)).catch_unwind().await;
        if outcome.is_err() {
            error!(task_id = %request.task_id, "execution panicked");
            let failed = TaskTransition::Failed {
                reason: REASON_PANIC.to_owned(),
            };
            self.write(&request.task_id, failed).await;
        }
    }

    async fn run(&self, request: &InterpretRequest) {
        let task_id = request.task_id.as_str();
        let config = &self.inner.config;

        let Ok(_permit) = self.inner.permits.clone().acquire_owned().await else {
            debug!(task_id, "runner closed before the task started");
            let failed = TaskTransition::Failed {
                reason: REASON_SHUTDOWN.to_owned(),
            };
            self.write(task_id, failed).await;
            return;
        };

        if !self.advance(task_id, PROGRESS_STARTED).await {
            return;
        }
        let started = Instant::now();
        debug!(task_id, interpreter = self.inner.interpreter.name(), "interpreter call started");

        let call = tokio::time::timeout(
            config.interpret_timeout,
            self.inner.interpreter.interpret(request),
        );
        tokio::pin!(call);

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + config.progress_interval,
            config.progress_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress = PROGRESS_STARTED;

        let result = loop {
            tokio::select! {
                result = &mut call => break result,
                // Past the ceiling the tick still rewrites the same progress, so
                // a deleted task is noticed and its identity freed.
                _ = heartbeat.tick() => {
                    progress = (progress + PROGRESS_STEP).min(PROGRESS_HEARTBEAT_CEILING);
                    if !self.advance(task_id, progress).await {
                        return;
                    }
                }
            }
        };

        let result = match result {
            Err(_) => Err(AdapterError::Timeout(config.interpret_timeout)),
            Ok(Ok(value)) if is_empty_payload(&value) => {
                Err(AdapterError::Malformed("empty interpretation result".into()))
            }
            Ok(other) => other,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                if !self.advance(task_id, PROGRESS_RETURNED).await {
                    return;
                }
                let result_content = match serde_json::to_string(&value) {
                    Ok(json) => json,
                    Err(e) => {
                        let failed = TaskTransition::Failed {
                            reason: format!("internal error: {e}"),
                        };
                        self.write(task_id, failed).await;
                        return;
                    }
                };
                if self
                    .write(task_id, TaskTransition::Completed { result_content })
                    .await
                    == Write::Applied
                {
                    info!(task_id, elapsed_ms, "task completed");
                }
            }
            Err(e) => {
                warn!(task_id, elapsed_ms, error = %e, "interpretation failed");
                self.write(task_id, TaskTransition::Failed { reason: e.to_string() })
                    .await;
            }
        }
    }

    async fn advance(&self, task_id: &str, progress: u8) -> bool {
        self.write(task_id, TaskTransition::Processing { progress }).await == Write::Applied
    }

    /// Apply one transition, retrying a store failure once. If the retry also
    /// fails, make a single attempt to record the failure on the task.
    async fn write(&self, task_id: &str, transition: TaskTransition) -> Write {
        let store = &self.inner.store;
        let first = match store.update_task_state(task_id, &transition).await {
            Ok(changed) => Ok(changed),
            Err(e) => {
                warn!(task_id, error = %e, "store write failed; retrying once");
                tokio::time::sleep(self.inner.config.store_retry_delay).await;
                store.update_task_state(task_id, &transition).await
            }
        };

        match first {
            Ok(0) => {
                debug!(task_id, to = %transition.status(), "task missing or already terminal; abandoning");
                Write::Skipped
            }
            Ok(_) => Write::Applied,
            Err(e) => {
                error!(task_id, error = %e, "store write failed after retry");
                if !matches!(transition, TaskTransition::Failed { .. }) {
                    let failed = TaskTransition::Failed {
                        reason: format!("internal error: {e}"),
                    };
                    if let Err(e) = store.update_task_state(task_id, &failed).await {
                        error!(task_id, error = %e, "failed to record store failure on task");
                    }
                }
                Write::Failed
            }
        }
    }
}

/// `T` + UTC timestamp + 12 upper-case hex characters.
pub fn new_task_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "T{}{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        random[..12].to_ascii_uppercase()
    )
}

fn duplicate(task: &NewTask) -> CoreError {
    CoreError::DuplicateTask {
        task_name: task.task_name.clone(),
        company: task.company.clone(),
    }
}

fn is_empty_payload(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests;
