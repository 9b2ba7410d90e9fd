use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateContentRequest {
    /// Edited interpretation, stored verbatim.
    #[validate(length(max = 10485760))]
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct DeleteBatchRequest {
    #[validate(length(min = 1, max = 1000))]
    pub task_ids: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteBatchResponse {
    pub deleted: u64,
}
