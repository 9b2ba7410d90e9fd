use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Bodies at or above this size are never buffered for logging.
const LOGGED_BODY_LIMIT: usize = 1024;

pub async fn trace_middleware(
    State(_state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start_time = Instant::now();

    // Reuse a well-formed client trace id, otherwise mint one.
    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
    );

    async move {
        info!("→ request started");
        let trace_header = HeaderValue::from_str(&trace_id.to_string()).ok();

        let mut req = if is_small_json(req.headers()) {
            let (parts, body) = req.into_parts();
            let bytes = buffer_and_log("request", &parts.headers, body).await;
            Request::from_parts(parts, Body::from(bytes))
        } else {
            req
        };
        if let Some(value) = &trace_header {
            req.headers_mut().insert(X_TRACE_ID, value.clone());
        }

        let response = next.run(req).await;

        let mut response = if is_json(response.headers()) {
            let (parts, body) = response.into_parts();
            let bytes = buffer_and_log("response", &parts.headers, body).await;
            Response::from_parts(parts, Body::from(bytes))
        } else {
            response
        };
        if let Some(value) = trace_header {
            response.headers_mut().insert(X_TRACE_ID, value);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis() as u64,
            "← response finished"
        );

        response
    }
    .instrument(span)
    .await
}

fn is_json(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

fn is_small_json(headers: &header::HeaderMap) -> bool {
    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    is_json(headers) && length.is_some_and(|n| n < LOGGED_BODY_LIMIT)
}

async fn buffer_and_log(direction: &str, headers: &header::HeaderMap, body: Body) -> Bytes {
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Bytes::new(),
    };

    if bytes.len() < LOGGED_BODY_LIMIT {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            debug!("{} body: {}", direction, text);
        }
    } else {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        debug!("{} body: [skipped: type={}, size={}]", direction, content_type, bytes.len());
    }

    bytes
}
