//! Error classification.
//!
//! Every failure leaves the service through one table. Rules are evaluated
//! in order and the first match decides the status and machine-readable
//! code; anything unmatched is a 500.
//!
//! # Response Envelope
//!
//! ```json
//! { "error": "File too large", "details": "File exceeds ...", "code": "FILE_TOO_LARGE" }
//! ```
//!
//! `retryAfter` is added on 429. When the router exposes error traces, a
//! `trace` with the error's debug representation is added by
//! [`error_trace_middleware`](super::middleware::error_trace_middleware).

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{AuthError, ParamError, ServiceError, TransformError, UploadError};

// =============================================================================
// Rules
// =============================================================================

/// One row of the classification table.
pub struct Rule {
    pub matches: fn(&ServiceError) -> bool,
    pub status: StatusCode,
    pub code: &'static str,
    pub title: &'static str,
}

/// The outcome of classifying an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: StatusCode,
    pub code: &'static str,
    pub title: &'static str,
}

/// Used when no rule matches.
pub const FALLBACK: Classification = Classification {
    status: StatusCode::INTERNAL_SERVER_ERROR,
    code: "INTERNAL_SERVER_ERROR",
    title: "Internal server error",
};

/// Classification rules in priority order.
pub static RULES: &[Rule] = &[
    // Size limits
    Rule {
        matches: |e| matches!(e, ServiceError::Upload(UploadError::FileTooLarge { .. })),
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "FILE_TOO_LARGE",
        title: "File too large",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::PayloadTooLarge { .. }),
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "PAYLOAD_TOO_LARGE",
        title: "Payload too large",
    },
    // Upload shape
    Rule {
        matches: |e| matches!(e, ServiceError::Upload(UploadError::TooManyFiles)),
        status: StatusCode::BAD_REQUEST,
        code: "TOO_MANY_FILES",
        title: "Too many files",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Upload(UploadError::UnexpectedFileField { .. })),
        status: StatusCode::BAD_REQUEST,
        code: "UNEXPECTED_FILE_FIELD",
        title: "Unexpected file field",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Upload(UploadError::NoFile { .. })),
        status: StatusCode::BAD_REQUEST,
        code: "NO_FILE_UPLOADED",
        title: "No file uploaded",
    },
    // Image content
    Rule {
        matches: |e| {
            matches!(
                e,
                ServiceError::Transform(TransformError::UnsupportedImageFormat { .. })
            )
        },
        status: StatusCode::BAD_REQUEST,
        code: "UNSUPPORTED_IMAGE_FORMAT",
        title: "Unsupported image format",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Transform(TransformError::InvalidImageData { .. })),
        status: StatusCode::BAD_REQUEST,
        code: "INVALID_IMAGE_DATA",
        title: "Invalid image data",
    },
    Rule {
        matches: |e| {
            matches!(
                e,
                ServiceError::Transform(TransformError::InvalidDimensions { .. })
                    | ServiceError::Param(ParamError::MissingDimensions)
                    | ServiceError::Param(ParamError::InvalidDimension { .. })
            )
        },
        status: StatusCode::BAD_REQUEST,
        code: "INVALID_DIMENSIONS",
        title: "Invalid dimensions",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Upload(UploadError::InvalidFileType { .. })),
        status: StatusCode::BAD_REQUEST,
        code: "INVALID_FILE_TYPE",
        title: "Invalid file type",
    },
    // Parameters
    Rule {
        matches: |e| matches!(e, ServiceError::Param(ParamError::UnsupportedFormat { .. })),
        status: StatusCode::BAD_REQUEST,
        code: "UNSUPPORTED_FORMAT",
        title: "Unsupported format",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Param(ParamError::Missing { .. })),
        status: StatusCode::BAD_REQUEST,
        code: "MISSING_PARAMETER",
        title: "Missing parameter",
    },
    Rule {
        matches: |e| {
            matches!(
                e,
                ServiceError::Param(ParamError::InvalidValue { .. })
                    | ServiceError::Upload(UploadError::FieldTooLong { .. })
            )
        },
        status: StatusCode::BAD_REQUEST,
        code: "INVALID_PARAMETER",
        title: "Invalid parameter",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Upload(UploadError::Malformed { .. })),
        status: StatusCode::BAD_REQUEST,
        code: "MALFORMED_REQUEST",
        title: "Malformed request",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::InvalidJson { .. }),
        status: StatusCode::BAD_REQUEST,
        code: "INVALID_JSON",
        title: "Invalid JSON",
    },
    // Authentication
    Rule {
        matches: |e| matches!(e, ServiceError::Auth(AuthError::TokenExpired { .. })),
        status: StatusCode::UNAUTHORIZED,
        code: "TOKEN_EXPIRED",
        title: "Token expired",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Auth(AuthError::InvalidToken { .. })),
        status: StatusCode::UNAUTHORIZED,
        code: "INVALID_TOKEN",
        title: "Invalid token",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Auth(AuthError::MissingCredentials)),
        status: StatusCode::UNAUTHORIZED,
        code: "AUTHENTICATION_REQUIRED",
        title: "Authentication required",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Auth(AuthError::MissingApiKey)),
        status: StatusCode::UNAUTHORIZED,
        code: "MISSING_API_KEY",
        title: "Missing API key",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Auth(AuthError::InvalidApiKey)),
        status: StatusCode::UNAUTHORIZED,
        code: "INVALID_API_KEY",
        title: "Invalid API key",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Auth(AuthError::NotConfigured { .. })),
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "AUTH_NOT_CONFIGURED",
        title: "Authentication not configured",
    },
    // Capacity and dependencies
    Rule {
        matches: |e| matches!(e, ServiceError::RateLimited { .. }),
        status: StatusCode::TOO_MANY_REQUESTS,
        code: "RATE_LIMIT_EXCEEDED",
        title: "Too many requests",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Unavailable { .. }),
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "SERVICE_UNAVAILABLE",
        title: "Service unavailable",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::Timeout { .. }),
        status: StatusCode::GATEWAY_TIMEOUT,
        code: "REQUEST_TIMEOUT",
        title: "Request timeout",
    },
    Rule {
        matches: |e| {
            matches!(
                e,
                ServiceError::Transform(TransformError::InsufficientMemory { .. })
            )
        },
        status: StatusCode::INSUFFICIENT_STORAGE,
        code: "INSUFFICIENT_STORAGE",
        title: "Insufficient storage",
    },
    Rule {
        matches: |e| matches!(e, ServiceError::NotFound { .. }),
        status: StatusCode::NOT_FOUND,
        code: "NOT_FOUND",
        title: "Not found",
    },
];

/// Classify `err` against [`RULES`].
pub fn classify(err: &ServiceError) -> Classification {
    RULES
        .iter()
        .find(|rule| (rule.matches)(err))
        .map(|rule| Classification {
            status: rule.status,
            code: rule.code,
            title: rule.title,
        })
        .unwrap_or(FALLBACK)
}

// =============================================================================
// Response
// =============================================================================

/// JSON error envelope returned for all error conditions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Short human-readable title
    pub error: String,

    /// What went wrong, in detail
    pub details: String,

    /// Machine-readable code, stable across releases
    pub code: String,

    /// Seconds until the caller may retry (429 only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,

    /// Debug representation of the error, when traces are exposed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Attached to error responses so outer middleware can log them with
/// request context.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub code: &'static str,
    pub status: StatusCode,
    pub details: String,
    /// Debug representation of the error
    pub trace: String,
}

impl ErrorResponse {
    pub fn from_error(err: &ServiceError) -> (Classification, Self) {
        let class = classify(err);
        let retry_after = match err {
            ServiceError::RateLimited { retry_after, .. } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };

        let response = Self {
            error: class.title.to_string(),
            details: err.to_string(),
            code: class.code.to_string(),
            retry_after,
            trace: None,
        };
        (class, response)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (class, body) = ErrorResponse::from_error(&self);

        debug!(
            code = class.code,
            status = class.status.as_u16(),
            "Request failed: {}",
            body.details
        );

        let retry_after = body.retry_after;
        let report = ErrorReport {
            code: class.code,
            status: class.status,
            details: body.details.clone(),
            trace: format!("{:?}", self),
        };

        let mut response = (class.status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response.extensions_mut().insert(report);
        response
    }
}

// =============================================================================
// Tests
// =============================================================================
