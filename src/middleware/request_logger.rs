use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use uuid::Uuid;

use crate::utils::sanitize::sanitize_json;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_BODY_LOG_SIZE: usize = 1024; // 1KB of rendered body per log line

/// Bodies are buffered up to axum's default extractor limit before logging.
const MAX_BUFFERED_BODY: usize = 2 * 1024 * 1024;

/// Per-router logging options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogging {
    /// Log the (sanitized, truncated) request body.
    pub log_body: bool,
}

fn describe_body(bytes: &[u8]) -> String {
    let described = match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(json) => serde_json::to_string(&sanitize_json(&json))
            .unwrap_or_else(|_| "[invalid json]".to_string()),
        Err(_) => return format!("[non-json, {} bytes]", bytes.len()),
    };

    match described.char_indices().nth(MAX_BODY_LOG_SIZE) {
        Some((cut, _)) => format!("{}...[truncated]", &described[..cut]),
        None => described,
    }
}

pub async fn request_logger_middleware(
    State(logging): State<RequestLogging>,
    mut req: Request,
    next: Next,
) -> Response {
    // Keep a caller-supplied id so logs correlate across hops.
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id).ok();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    if let Some(value) = &header_value {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    if logging.log_body {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    method = %method,
                    uri = %uri,
                    "Request body too large or failed to read"
                );
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };

        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            body_size = bytes.len(),
            body = %describe_body(&bytes),
            "Incoming request"
        );

        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        tracing::info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            "Incoming request"
        );
    }

    let response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Outgoing response"
    );

    let (mut parts, body) = response.into_parts();
    if let Some(value) = header_value {
        parts.headers.insert(REQUEST_ID_HEADER, value);
    }

    Response::from_parts(parts, body)
}
