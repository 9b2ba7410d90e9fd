//! Submission and status polling.
//!
//! `POST /v1/interpretation/start` validates and stages the upload, creates a
//! `pending` task and returns its id with `202 Accepted`; the interpretation
//! itself runs in the background. Clients then poll
//! `GET /v1/interpretation/status` until the task is `completed` or `failed`.

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::BytesMut;
use policylens_core::intake::{self, FileStager, SubmissionBundle, UploadedFile};
use policylens_core::config::IntakeLimits;
use policylens_core::query::StatusQuery;
use policylens_core::{CoreError, TaskStatus, ValidationError};
use tracing::{debug, info, warn};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::error::ServerError;
use crate::schemas::v1::interpretation::{
    StartInterpretationForm, StartInterpretationResponse, StatusQueryParams,
};
use crate::schemas::v1::task::TaskPageResponse;
use crate::schemas::ApiResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(start_interpretation, query_status),
    components(schemas(StartInterpretationForm, StartInterpretationResponse, TaskPageResponse))
)]
pub struct InterpretationApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/interpretation/start", post(start_interpretation))
        .route("/interpretation/status", get(query_status))
}

/// Start interpreting a group-order contract.
///
/// Fields: `task_name`, `company`, `scene`, one `pdf_file` and up to 30
/// `png_files` (PNG/JPG, 50 MB each by default).
#[utoipa::path(
    post,
    path = "/v1/interpretation/start",
    tag = "interpretation",
    request_body(content = StartInterpretationForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Task accepted", body = StartInterpretationResponse),
        (status = 400, description = "Missing field, wrong file type, too many or too large files"),
        (status = 409, description = "A task for this name and company is already running"),
        (status = 500, description = "Staging or database failure"),
    )
)]
pub async fn start_interpretation(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ApiResponse<StartInterpretationResponse>>), ServerError> {
    let bundle = read_bundle(multipart?, &state.config.intake).await?;
    debug!(
        task_name = %bundle.task_name,
        company = %bundle.company,
        primary = bundle.primary.len(),
        supplementary = bundle.supplementary.len(),
        "received interpretation request"
    );

    intake::validate_bundle(&bundle, &state.config.intake).map_err(CoreError::from)?;

    let staging_key = Uuid::new_v4().simple().to_string();
    let handles = intake::stage_bundle(state.stager.as_ref(), &staging_key, &bundle).await?;

    let task_id = match state.runner.submit(bundle.new_task(), handles).await {
        Ok(task_id) => task_id,
        Err(e) => {
            if let Err(discard_err) = state.stager.discard(&staging_key).await {
                warn!(staging_key, error = %discard_err, "failed to discard staged upload");
            }
            return Err(e.into());
        }
    };

    info!(task_id = %task_id, staging_key, "interpretation task started");
    Ok((
        StatusCode::ACCEPTED,
        Json(
            ApiResponse::data(StartInterpretationResponse {
                task_id,
                status: TaskStatus::Pending.to_string(),
            })
            .with_message("Interpretation task started"),
        ),
    ))
}

/// Poll the tasks submitted under a task name and company, newest first.
#[utoipa::path(
    get,
    path = "/v1/interpretation/status",
    tag = "interpretation",
    params(StatusQueryParams),
    responses(
        (status = 200, description = "One page of matching tasks", body = TaskPageResponse),
        (status = 400, description = "Missing task_name/company or invalid pagination"),
        (status = 500, description = "Database failure"),
    )
)]
pub async fn query_status(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StatusQueryParams>, QueryRejection>,
) -> Result<Json<ApiResponse<TaskPageResponse>>, ServerError> {
    let Query(params) = params?;
    let page = state
        .queries
        .query_status(&StatusQuery {
            task_name: params.task_name.unwrap_or_default(),
            company: params.company.unwrap_or_default(),
            page: params.page,
            page_size: params.page_size,
        })
        .await?;
    Ok(Json(ApiResponse::data(page.into())))
}

/// Collect the multipart fields into a [`SubmissionBundle`]. An image beyond
/// the allowed count, or a file crossing the size limit, is refused before the
/// rest of the body is read.
async fn read_bundle(mut multipart: Multipart, limits: &IntakeLimits) -> Result<SubmissionBundle, ServerError> {
    let max_file_bytes = limits.max_file_size_bytes;
    let mut bundle = SubmissionBundle::default();

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "task_name" | "company" | "scene" => {
                let value = field.text().await?;
                match name.as_str() {
                    "task_name" => bundle.task_name = value,
                    "company" => bundle.company = value,
                    _ => bundle.scene = value,
                }
            }
            "pdf_file" | "png_files" | "png_files[]" => {
                if name != "pdf_file" && bundle.supplementary.len() >= limits.max_supplementary_files {
                    return Err(CoreError::from(ValidationError::TooManySupplementaryFiles {
                        count: bundle.supplementary.len() + 1,
                        max: limits.max_supplementary_files,
                    })
                    .into());
                }
                let file_name = field.file_name().unwrap_or("upload").to_owned();
                let content_type = field.content_type().map(str::to_owned);

                let mut bytes = BytesMut::new();
                while let Some(chunk) = field.chunk().await? {
                    bytes.extend_from_slice(&chunk);
                    if bytes.len() as u64 > max_file_bytes {
                        return Err(CoreError::from(ValidationError::FileTooLarge {
                            file_name,
                            size_bytes: bytes.len() as u64,
                            max_bytes: max_file_bytes,
                        })
                        .into());
                    }
                }

                let file = UploadedFile::new(file_name, content_type, bytes.freeze());
                if name == "pdf_file" {
                    bundle.primary.push(file);
                } else {
                    bundle.supplementary.push(file);
                }
            }
            other => {
                return Err(ServerError::BadRequest(format!("unknown field: {other}")));
            }
        }
    }

    Ok(bundle)
}
