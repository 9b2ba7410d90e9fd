//! Interpreter adapters.
//!
//! An [`Interpreter`] turns a staged [`HandleSet`] into structured JSON. The
//! runner owns timeouts and retries; adapters make exactly one attempt.

mod http;
mod simulated;

pub use http::HttpInterpreter;
pub use simulated::SimulatedInterpreter;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::config::InterpreterConfig;
use crate::error::{AdapterError, CoreError};
use crate::intake::HandleSet;

/// Everything an adapter needs to interpret one task.
#[derive(Debug, Clone, Serialize)]
pub struct InterpretRequest {
    pub task_id: String,
    pub task_name: String,
    pub company: String,
    pub scene: String,
    pub handles: HandleSet,
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Interpret the documents in `request`. A successful result is a
    /// non-null JSON value.
    async fn interpret(&self, request: &InterpretRequest) -> Result<serde_json::Value, AdapterError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl Interpreter for Box<dyn Interpreter> {
    async fn interpret(&self, request: &InterpretRequest) -> Result<serde_json::Value, AdapterError> {
        (**self).interpret(request).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Pick the adapter described by `config`: the HTTP client when an endpoint is
/// set, otherwise the simulated interpreter.
pub fn build_interpreter(config: &InterpreterConfig) -> Result<Arc<dyn Interpreter>, CoreError> {
    match &config.endpoint {
        Some(endpoint) => {
            let client = HttpInterpreter::new(
                endpoint.clone(),
                config.auth_token.clone(),
                config.query.clone(),
            )
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {e}")))?;
            info!(endpoint = %endpoint, "using HTTP interpreter");
            Ok(Arc::new(client))
        }
        None => {
            info!(
                delay_ms = config.simulated_delay.as_millis() as u64,
                "no interpreter endpoint configured; using simulated interpreter"
            );
            Ok(Arc::new(SimulatedInterpreter::new(config.simulated_delay)))
        }
    }
}
