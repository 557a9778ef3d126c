//! Cross-cutting middleware: failure auditing, error traces and security
//! headers.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::Value;
use tracing::{error, warn};

use super::auth::Principal;
use super::classify::ErrorReport;

/// Log every failed request with its context.
///
/// Runs outside auth so that auth failures are audited too. Client errors
/// log at WARN, server errors at ERROR.
pub async fn audit_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let principal = response
        .extensions()
        .get::<Principal>()
        .map(|p| p.id.clone())
        .unwrap_or_else(|| "anonymous".to_string());
    let (code, details) = match response.extensions().get::<ErrorReport>() {
        Some(report) => (report.code, report.details.as_str()),
        None => ("UNCLASSIFIED", ""),
    };
    let timestamp = Utc::now().to_rfc3339();

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            user_agent = %user_agent,
            principal = %principal,
            status = status.as_u16(),
            code = code,
            timestamp = %timestamp,
            "Request failed: {}",
            details
        );
    } else {
        warn!(
            method = %method,
            path = %path,
            user_agent = %user_agent,
            principal = %principal,
            status = status.as_u16(),
            code = code,
            timestamp = %timestamp,
            "Request rejected: {}",
            details
        );
    }

    response
}

/// Error envelopes are small; anything larger is not ours to rewrite.
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Add a `trace` field with the error's debug representation to error
/// envelopes.
///
/// Only installed when the router exposes error traces.
pub async fn error_trace_middleware(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let Some(trace) = response
        .extensions()
        .get::<ErrorReport>()
        .map(|report| report.trace.clone())
    else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_ERROR_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Could not buffer error body");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let mut envelope: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };
    if let Some(fields) = envelope.as_object_mut() {
        fields.insert("trace".to_string(), Value::String(trace));
    }

    match serde_json::to_vec(&envelope) {
        Ok(body) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(body))
        }
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}

/// Headers added to every response when security headers are enabled.
pub fn security_headers(hsts: bool) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = vec![
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
        (
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ),
        (
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'"),
        ),
    ];
    if hsts {
        headers.push((
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ));
    }
    headers
}
