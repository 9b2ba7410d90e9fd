use chrono::SecondsFormat;
use policylens_core::{Page, TaskView};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// One task as returned by every read endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    pub task_id: String,
    pub task_name: String,
    pub company: String,
    pub scene: String,
    /// `pending`, `processing`, `completed` or `failed`.
    pub status: String,
    /// Percentage, 0–100.
    pub progress: u8,
    /// Interpretation result; present only once the task completed.
    #[schema(value_type = Option<Object>)]
    pub result_content: Option<serde_json::Value>,
    pub error_msg: Option<String>,
    pub update_content: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TaskView> for TaskResponse {
    fn from(view: TaskView) -> Self {
        Self {
            task_id: view.task_id,
            task_name: view.task_name,
            company: view.company,
            scene: view.scene,
            status: view.status.to_string(),
            progress: view.progress,
            result_content: view
                .result_content
                .map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s))),
            error_msg: view.error_msg,
            update_content: view.update_content,
            created_at: view.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            updated_at: view.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// One page of tasks.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskPageResponse {
    pub items: Vec<TaskResponse>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl From<Page<TaskView>> for TaskPageResponse {
    fn from(page: Page<TaskView>) -> Self {
        let page = page.map(TaskResponse::from);
        Self {
            items: page.items,
            page: page.page,
            page_size: page.page_size,
            total: page.total,
            total_pages: page.total_pages,
            has_next: page.has_next,
            has_prev: page.has_prev,
        }
    }
}

/// Filters for the task listing. Empty strings mean "any".
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TaskListParams {
    pub status: Option<String>,
    pub company: Option<String>,
    pub scene: Option<String>,
    /// Tasks created on or before this date (`YYYY-MM-DD`, UTC).
    pub create_time: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}
