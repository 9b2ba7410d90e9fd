//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection, upload size cap)
//! - Optional OpenAPI document (disable with `POLICYLENS_ENABLE_DOCS=false`)
//! - Health route
//! - `/v1` interpretation, form and task routes

pub mod doc;
mod health;
mod v1;

use crate::middleware::{cors, trace};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .nest("/v1", v1::router());

    if state.config.enable_docs {
        let api_doc = doc::get_docs();
        app = app.route(
            "/api-docs/openapi.json",
            get(move || {
                let api_doc = api_doc.clone();
                async move { Json(api_doc) }
            }),
        );
    }

    app
        // A full submission: every allowed file at the size cap.
        .layer(DefaultBodyLimit::max(state.config.intake.max_request_bytes()))
        // Outermost layers execute first on the way in.
        .layer(cors::cors_layer(&state))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}
