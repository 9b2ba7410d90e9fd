use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{InterpretRequest, Interpreter};
use crate::error::AdapterError;

const AUTH_HEADER: &str = "X-Auth-Token";
/// Longest remote error body kept as a failure reason, in characters.
const MAX_REMOTE_MESSAGE_CHARS: usize = 512;

/// Calls a remote interpretation workflow over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInterpreter {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
    query: String,
}

#[derive(Serialize)]
struct WorkflowRequest<'a> {
    query: &'a str,
    task_id: &'a str,
    task_name: &'a str,
    company: &'a str,
    scene: &'a str,
    files: Vec<WorkflowFile<'a>>,
}

#[derive(Serialize)]
struct WorkflowFile<'a> {
    role: &'static str,
    name: &'a str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    size_bytes: u64,
}

impl HttpInterpreter {
    pub fn new(
        endpoint: impl Into<String>,
        auth_token: Option<String>,
        query: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            auth_token,
            query: query.into(),
        })
    }

    fn body<'a>(&'a self, request: &'a InterpretRequest) -> WorkflowRequest<'a> {
        let file = |role, handle: &'a crate::intake::FileHandle| WorkflowFile {
            role,
            name: &handle.original_name,
            path: handle.path.display().to_string(),
            content_type: handle.content_type.as_deref(),
            size_bytes: handle.size_bytes,
        };
        let mut files = vec![file("contract", &request.handles.primary)];
        files.extend(
            request
                .handles
                .supplementary
                .iter()
                .map(|h| file("quote", h)),
        );

        WorkflowRequest {
            query: &self.query,
            task_id: &request.task_id,
            task_name: &request.task_name,
            company: &request.company,
            scene: &request.scene,
            files,
        }
    }
}

#[async_trait]
impl Interpreter for HttpInterpreter {
    async fn interpret(&self, request: &InterpretRequest) -> Result<serde_json::Value, AdapterError> {
        let mut req = self.client.post(&self.endpoint).json(&self.body(request));
        if let Some(token) = &self.auth_token {
            req = req.header(AUTH_HEADER, token);
        }

        debug!(task_id = %request.task_id, endpoint = %self.endpoint, "calling interpreter");
        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Remote {
                status: status.as_u16(),
                message: truncate_message(body.trim()),
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Err(AdapterError::Malformed("empty response body".into()));
        }
        serde_json::from_str(&text).map_err(|e| AdapterError::Malformed(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn truncate_message(body: &str) -> String {
    match body.char_indices().nth(MAX_REMOTE_MESSAGE_CHARS) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_owned(),
    }
}
