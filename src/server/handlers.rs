//! HTTP request handlers for the image API.
//!
//! # Endpoints
//!
//! - `POST /api/images/{resize,compress,watermark,convert,metadata}` - Transform an upload
//! - `GET /health` - Liveness
//! - `GET /api/admin/health` - Readiness (API key)
//! - `POST /api/admin/tokens` - Issue a local bearer token (API key)

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        Multipart, State,
    },
    http::{header, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthError, ParamError, ServiceError, UploadError};
use crate::transform::{Operation, ParamLimits, TransformEngine, TransformRequest, WorkerPool};

use super::auth::{Principal, AuthResolver, Role};
use super::health::{run_readiness_checks, HealthResponse};
use super::token::DEFAULT_TOKEN_TTL;
use super::upload::{read_upload, UploadLimits};

/// Longest lifetime an issued token may have (30 days).
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Executor for the five operations
    pub engine: Arc<TransformEngine>,

    /// Bounded pool the engine runs on
    pub pool: WorkerPool,

    /// Parameter limits derived from the engine settings
    pub param_limits: ParamLimits,

    pub upload_limits: UploadLimits,

    /// Cap on JSON bodies, reported in 413 responses
    pub json_body_limit: usize,

    /// Cache-Control max-age for transformed images, in seconds
    pub cache_max_age: u32,

    /// Resolver, shared with the auth middleware
    pub auth: Arc<AuthResolver>,

    /// Lifetime of tokens issued without an explicit TTL
    pub token_ttl: Duration,

    pub started_at: Instant,
}

impl AppState {
    /// Create application state with default limits.
    pub fn new(engine: Arc<TransformEngine>, auth: Arc<AuthResolver>) -> Self {
        Self {
            param_limits: engine.param_limits(),
            engine,
            pool: WorkerPool::default(),
            upload_limits: UploadLimits::default(),
            json_body_limit: 1024 * 1024,
            cache_max_age: 3600,
            auth,
            token_ttl: DEFAULT_TOKEN_TTL,
            started_at: Instant::now(),
        }
    }
}

// =============================================================================
// Image Operations
// =============================================================================

/// `POST /api/images/resize`
pub async fn resize_handler(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    run_operation(&state, Operation::Resize, &principal, multipart).await
}

/// `POST /api/images/compress`
///
/// Adds `X-Original-Size`, `X-Compressed-Size` and `X-Compression-Ratio`.
pub async fn compress_handler(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    run_operation(&state, Operation::Compress, &principal, multipart).await
}

/// `POST /api/images/watermark`
pub async fn watermark_handler(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    run_operation(&state, Operation::Watermark, &principal, multipart).await
}

/// `POST /api/images/convert`
pub async fn convert_handler(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    run_operation(&state, Operation::Convert, &principal, multipart).await
}

/// `POST /api/images/metadata`
///
/// Responds with JSON rather than an image.
pub async fn metadata_handler(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    run_operation(&state, Operation::Metadata, &principal, multipart).await
}

/// Shared pipeline: read upload, parse parameters, transform on the pool.
///
/// Parameters are validated before any pixel work, so a bad `format` is
/// rejected without decoding the upload.
async fn run_operation(
    state: &AppState,
    operation: Operation,
    principal: &Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServiceError> {
    let started = Instant::now();

    let multipart = multipart.map_err(|rejection| UploadError::Malformed {
        message: rejection.body_text(),
    })?;
    let form = read_upload(multipart, &state.upload_limits).await?;
    let request = TransformRequest::from_fields(operation, &form.fields, &state.param_limits)?;

    let input_size = form.asset.size_bytes;
    let engine = Arc::clone(&state.engine);
    let input = form.asset.bytes;
    let result = state
        .pool
        .run(move || engine.execute(&input, &request))
        .await?;

    debug!(
        operation = operation.name(),
        principal = %principal.id,
        input_bytes = input_size,
        output_bytes = result.size_bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Transform complete"
    );

    let cache_control = if operation == Operation::Metadata {
        "no-store".to_string()
    } else {
        format!("private, max-age={}", state.cache_max_age)
    };

    let mut response = Response::new(Body::from(result.bytes));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(result.content_type),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(result.size_bytes));
    headers.insert(header::CACHE_CONTROL, header_value(&cache_control)?);
    for (name, value) in &result.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ServiceError::Internal {
            message: format!("invalid header name {}: {}", name, e),
        })?;
        headers.insert(name, header_value(value)?);
    }

    Ok(response)
}

fn header_value(value: &str) -> Result<HeaderValue, ServiceError> {
    HeaderValue::from_str(value).map_err(|e| ServiceError::Internal {
        message: format!("invalid header value: {}", e),
    })
}

// =============================================================================
// Health
// =============================================================================

/// `GET /health`
///
/// Always `200 OK` while the process is serving.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::alive(state.started_at))
}

/// `GET /api/admin/health`
///
/// `200 OK` when healthy or degraded, `503 Service Unavailable` when any
/// required check fails.
pub async fn readiness_handler(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let engine = Arc::clone(&state.engine);
    let auth = Arc::clone(&state.auth);
    let report = tokio::task::spawn_blocking(move || run_readiness_checks(&engine, &auth))
        .await
        .map_err(|e| ServiceError::Internal {
            message: format!("readiness check failed: {}", e),
        })?;

    let status = if report.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(report)).into_response())
}

// =============================================================================
// Token Issuance
// =============================================================================

/// Body of `POST /api/admin/tokens`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub subject: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

/// `POST /api/admin/tokens`
pub async fn issue_token_handler(
    State(state): State<AppState>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let Json(body) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ServiceError::PayloadTooLarge {
                limit: state.json_body_limit,
            }
        } else {
            ServiceError::InvalidJson {
                message: rejection.body_text(),
            }
        }
    })?;

    let signer = state.auth.token_signer().ok_or(AuthError::NotConfigured {
        what: "token secret",
    })?;

    let subject = body.subject.trim();
    if subject.is_empty() {
        return Err(ParamError::Missing { name: "subject" }.into());
    }

    let role = match body.role.as_deref() {
        None => Role::User,
        Some(raw) => match Role::parse(raw) {
            Some(Role::Anonymous) | None => {
                return Err(ParamError::InvalidValue {
                    name: "role",
                    value: raw.to_string(),
                    expected: "user or admin".to_string(),
                }
                .into())
            }
            Some(role) => role,
        },
    };

    let ttl = match body.ttl_seconds {
        None => state.token_ttl,
        Some(secs) if secs > 0 && secs <= MAX_TOKEN_TTL.as_secs() => Duration::from_secs(secs),
        Some(secs) => {
            return Err(ParamError::InvalidValue {
                name: "ttlSeconds",
                value: secs.to_string(),
                expected: format!("between 1 and {}", MAX_TOKEN_TTL.as_secs()),
            }
            .into())
        }
    };

    let (token, exp) = signer.issue(subject, role, ttl);
    let expires_at = Utc
        .timestamp_opt(exp as i64, 0)
        .single()
        .ok_or_else(|| ServiceError::Internal {
            message: "token expiry out of range".to_string(),
        })?;

    debug!(subject = %subject, role = %role, ttl_secs = ttl.as_secs(), "Issued token");

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            token,
            token_type: "Bearer",
            expires_at,
        }),
    )
        .into_response())
}

// =============================================================================
// Fallback
// =============================================================================

/// Unmatched routes get the standard error envelope.
pub async fn not_found_handler(uri: Uri) -> ServiceError {
    ServiceError::NotFound {
        path: uri.path().to_string(),
    }
}
