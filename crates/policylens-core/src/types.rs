use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

/// Progress reported once a task completes.
pub const PROGRESS_COMPLETE: u8 = 100;

/// Lifecycle state of an interpretation task.
///
/// Transitions run strictly forward along
/// `Pending → Processing → {Completed, Failed}`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    /// Row created, execution not started yet.
    Pending,
    /// Interpreter call in progress.
    Processing,
    /// Result persisted; `progress == 100`.
    Completed,
    /// Execution ended with an error; the reason is recorded.
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// States from which a write may move a task into `self`.
    ///
    /// `Processing → Processing` is the progress update. `Pending → Failed`
    /// covers tasks that die before their execution starts (restart, shutdown).
    pub fn predecessors(self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Pending => &[],
            TaskStatus::Processing => &[TaskStatus::Pending, TaskStatus::Processing],
            TaskStatus::Completed => &[TaskStatus::Processing],
            TaskStatus::Failed => &[TaskStatus::Pending, TaskStatus::Processing],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        next.predecessors().contains(&self)
    }
}

/// Caller-supplied classification of a new task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_name: String,
    pub company: String,
    pub scene: String,
}

impl NewTask {
    pub fn new(
        task_name: impl Into<String>,
        company: impl Into<String>,
        scene: impl Into<String>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            company: company.into(),
            scene: scene.into(),
        }
    }

    /// Key used by the duplicate-submission guard.
    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity {
            task_name: self.task_name.clone(),
            company: self.company.clone(),
        }
    }
}

/// `(task_name, company)`: at most one non-terminal task exists per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskIdentity {
    pub task_name: String,
    pub company: String,
}

/// A single atomic state write issued by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    /// Enter or stay in `Processing` with at least this progress.
    Processing { progress: u8 },
    /// Persist the interpretation result; progress becomes 100.
    Completed { result_content: String },
    /// Record the failure reason; progress keeps its last value.
    Failed { reason: String },
}

impl TaskTransition {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskTransition::Processing { .. } => TaskStatus::Processing,
            TaskTransition::Completed { .. } => TaskStatus::Completed,
            TaskTransition::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total: u64) -> Self {
        let total_pages = total.div_ceil(u64::from(page_size.max(1)));
        Self {
            items,
            page,
            page_size,
            total,
            total_pages,
            has_next: u64::from(page) < total_pages,
            has_prev: page > 1,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total: self.total,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }
}
