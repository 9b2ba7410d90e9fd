use chrono::{DateTime, NaiveDate, Utc};

use crate::types::{NewTask, TaskStatus};

/// A row in the `interpretation_tasks` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    pub task_name: String,
    pub company: String,
    pub scene: String,
    pub status: TaskStatus,
    /// Percentage, 0–100.
    pub progress: u8,
    /// Interpreter output (JSON text). `Some` only when `status == Completed`.
    pub result_content: Option<String>,
    /// Failure reason. `Some` only when `status == Failed`.
    pub error_msg: Option<String>,
    /// User edits applied after the fact; never touched by the runner.
    pub update_content: Option<String>,
    /// Serialized handle set the task was submitted with.
    pub input_data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh `Pending` row with zero progress.
    pub fn pending(task_id: impl Into<String>, task: &NewTask, input_data: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            task_name: task.task_name.clone(),
            company: task.company.clone(),
            scene: task.scene.clone(),
            status: TaskStatus::Pending,
            progress: 0,
            result_content: None,
            error_msg: None,
            update_content: None,
            input_data,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Row filter for [`TaskStore::query_tasks`](crate::entities::TaskStore::query_tasks).
///
/// Every `None` field matches all rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Substring match on `task_name`.
    pub task_name_contains: Option<String>,
    /// Exact match on `company`.
    pub company: Option<String>,
    pub scene: Option<String>,
    pub status: Option<TaskStatus>,
    /// Tasks created on or before this (UTC) date.
    pub created_on_or_before: Option<NaiveDate>,
}
