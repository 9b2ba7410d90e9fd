use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Multipart body of `POST /v1/interpretation/start`.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct StartInterpretationForm {
    pub task_name: String,
    pub company: String,
    pub scene: String,
    /// The group-order contract. Exactly one PDF.
    #[schema(value_type = String, format = Binary)]
    pub pdf_file: Vec<u8>,
    /// Quotation images (PNG/JPG), repeat the field for each file.
    #[schema(value_type = Vec<String>)]
    pub png_files: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartInterpretationResponse {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusQueryParams {
    /// Matches any task whose name contains this text.
    pub task_name: Option<String>,
    pub company: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}
