use crate::routes::{health, v1};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "policylens-server",
    description = "Asynchronous insurance group-order interpretation API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(v1::api_docs());
    root
}
