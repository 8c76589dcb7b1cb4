// src/logging_middleware.rs
//! Middleware for logging request and response bodies in debug mode

use axum::body::to_bytes;
use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::{debug, Level};

use crate::common::safe_token_log;

/// Bodies above this size are passed through without being logged
const MAX_LOGGED_BODY: usize = 64 * 1024;

/// JSON keys whose string values are device tokens or secrets
const MASKED_KEYS: &[&str] = &["token", "secret"];

/// Middleware to log request and response bodies in debug mode
pub async fn log_request_response(request: Request, next: Next) -> Result<Response, StatusCode> {
    if !tracing::enabled!(Level::DEBUG) {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(rendered) = render(&bytes) {
        debug!(
            method = %parts.method,
            uri = %mask_path(parts.uri.path()),
            request_body = %rendered,
            "📥 Request"
        );
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(rendered) = render(&bytes) {
        debug!(status = %parts.status, response_body = %rendered, "📤 Response");
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

fn render(bytes: &Bytes) -> Option<String> {
    if bytes.is_empty() || bytes.len() > MAX_LOGGED_BODY {
        return None;
    }
    let body_str = std::str::from_utf8(bytes).ok()?;

    match serde_json::from_str::<Value>(body_str) {
        Ok(mut json) => {
            mask_json(&mut json);
            Some(serde_json::to_string_pretty(&json).unwrap_or_else(|_| body_str.to_string()))
        }
        Err(_) => Some(body_str.to_string()),
    }
}

fn mask_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                let sensitive = MASKED_KEYS.iter().any(|k| key.to_lowercase().contains(k));
                match v {
                    Value::String(s) if sensitive => *s = safe_token_log(s),
                    _ => mask_json(v),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_json),
        _ => {}
    }
}

/// Device-token routes carry the token in the last path segment
fn mask_path(path: &str) -> String {
    match path.strip_prefix("/api/notifications/device-token/") {
        Some(token) if !token.is_empty() => {
            format!("/api/notifications/device-token/{}", safe_token_log(token))
        }
        _ => path.to_string(),
    }
}
