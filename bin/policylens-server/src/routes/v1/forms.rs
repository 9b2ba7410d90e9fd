//! Task detail and record mutation endpoints.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::schemas::v1::forms::{DeleteBatchRequest, DeleteBatchResponse, UpdateContentRequest};
use crate::schemas::v1::task::TaskResponse;
use crate::schemas::ApiResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(get_form, update_form, delete_form, delete_forms_batch),
    components(schemas(TaskResponse, UpdateContentRequest, DeleteBatchRequest, DeleteBatchResponse))
)]
pub struct FormsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/forms/delete-batch", delete(delete_forms_batch))
        .route("/forms/{task_id}", get(get_form).delete(delete_form))
        .route("/forms/{task_id}/update", post(update_form))
}

#[utoipa::path(
    get,
    path = "/v1/forms/{task_id}",
    tag = "forms",
    params(("task_id" = String, Path, description = "Task to retrieve")),
    responses(
        (status = 200, description = "Task retrieved", body = TaskResponse),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Database failure"),
    )
)]
pub async fn get_form(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<TaskResponse>>, ServerError> {
    let view = state.queries.get_task(&task_id).await?;
    Ok(Json(ApiResponse::data(view.into())))
}

/// Store user edits of an interpretation.
#[utoipa::path(
    post,
    path = "/v1/forms/{task_id}/update",
    tag = "forms",
    params(("task_id" = String, Path, description = "Task to update")),
    request_body = UpdateContentRequest,
    responses(
        (status = 200, description = "Content updated"),
        (status = 400, description = "Malformed body"),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Database failure"),
    )
)]
pub async fn update_form(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    body: Result<Json<UpdateContentRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>, ServerError> {
    let Json(req) = body?;
    req.validate()?;
    state.queries.update_content(&task_id, &req.content).await?;
    Ok(Json(ApiResponse::message("Form content updated successfully")))
}

#[utoipa::path(
    delete,
    path = "/v1/forms/{task_id}",
    tag = "forms",
    params(("task_id" = String, Path, description = "Task to delete")),
    responses(
        (status = 200, description = "Task deleted"),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Database failure"),
    )
)]
pub async fn delete_form(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ServerError> {
    state.queries.delete_task(&task_id).await?;
    Ok(Json(ApiResponse::message("Form deleted successfully")))
}

/// Delete several tasks at once. Unknown ids are ignored.
#[utoipa::path(
    delete,
    path = "/v1/forms/delete-batch",
    tag = "forms",
    request_body = DeleteBatchRequest,
    responses(
        (status = 200, description = "Tasks deleted", body = DeleteBatchResponse),
        (status = 400, description = "Empty or malformed task_ids"),
        (status = 500, description = "Database failure"),
    )
)]
pub async fn delete_forms_batch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DeleteBatchRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<DeleteBatchResponse>>, ServerError> {
    let Json(req) = body?;
    req.validate()?;
    let deleted = state.queries.delete_tasks(&req.task_ids).await?;
    Ok(Json(
        ApiResponse::data(DeleteBatchResponse { deleted })
            .with_message(format!("Deleted {deleted} forms successfully")),
    ))
}
