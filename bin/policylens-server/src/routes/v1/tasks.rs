//! Administrative listing of every task.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use policylens_core::query::TaskListQuery;
use policylens_core::TaskStatus;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::task::{TaskListParams, TaskPageResponse};
use crate::schemas::ApiResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_tasks), components(schemas(TaskPageResponse, TaskListParams)))]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tasks", get(list_tasks))
}

#[utoipa::path(
    get,
    path = "/v1/tasks",
    tag = "tasks",
    params(TaskListParams),
    responses(
        (status = 200, description = "Tasks listed", body = TaskPageResponse),
        (status = 400, description = "Unknown status, bad date or invalid pagination"),
        (status = 500, description = "Database failure"),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TaskListParams>, QueryRejection>,
) -> Result<Json<ApiResponse<TaskPageResponse>>, ServerError> {
    let Query(params) = params?;

    let status = non_blank(params.status)
        .map(|s| {
            TaskStatus::from_str(&s)
                .map_err(|_| ServerError::BadRequest(format!("unknown status: {s}")))
        })
        .transpose()?;
    let created_on_or_before = non_blank(params.create_time)
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|_| ServerError::BadRequest(format!("create_time must be YYYY-MM-DD, got {s}")))
        })
        .transpose()?;

    let page = state
        .queries
        .list_tasks(&TaskListQuery {
            status,
            company: params.company,
            scene: params.scene,
            created_on_or_before,
            page: params.page,
            page_size: params.page_size,
        })
        .await?;
    Ok(Json(ApiResponse::data(page.into())))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}
