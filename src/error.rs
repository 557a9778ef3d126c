use std::time::Duration;

use thiserror::Error;

/// Errors raised while reading and validating a multipart upload
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// No file part was present in the request
    #[error("No image file was uploaded (expected field '{field}')")]
    NoFile { field: &'static str },

    /// More than one file part was present
    #[error("Only one file may be uploaded per request")]
    TooManyFiles,

    /// A file was uploaded under an unexpected field name
    #[error("Unexpected file field '{field}' (expected '{expected}')")]
    UnexpectedFileField {
        field: String,
        expected: &'static str,
    },

    /// Declared content-type is not in the allow-list
    #[error("File type '{mime_type}' is not allowed")]
    InvalidFileType { mime_type: String },

    /// File exceeds the configured size ceiling
    #[error("File exceeds the maximum upload size of {limit} bytes")]
    FileTooLarge { limit: usize },

    /// A text field exceeded the per-field length cap
    #[error("Field '{field}' exceeds {limit} bytes")]
    FieldTooLong { field: String, limit: usize },

    /// The body is not well-formed multipart
    #[error("Malformed multipart body: {message}")]
    Malformed { message: String },
}

/// Errors raised while parsing operation parameters from wire strings
#[derive(Debug, Clone, Error)]
pub enum ParamError {
    /// A required parameter was not supplied
    #[error("Missing required parameter '{name}'")]
    Missing { name: &'static str },

    /// Neither width nor height was given to a resize
    #[error("At least one of 'width' or 'height' is required")]
    MissingDimensions,

    /// A width or height value was malformed or out of range
    #[error("Invalid {name} '{value}': {reason}")]
    InvalidDimension {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// Any other parameter was malformed or out of range
    #[error("Invalid {name} '{value}': expected {expected}")]
    InvalidValue {
        name: &'static str,
        value: String,
        expected: String,
    },

    /// The requested output format is not allow-listed
    #[error("Unsupported output format '{value}' (supported: jpeg, png, webp, avif)")]
    UnsupportedFormat { value: String },
}

/// Errors raised while resolving the caller's identity
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Route requires a bearer token but none was sent
    #[error("Authentication required")]
    MissingCredentials,

    /// Administrative route called without an API key
    #[error("Missing X-API-Key header")]
    MissingApiKey,

    /// API key did not match the configured secret
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Bearer token is malformed, forged, or rejected by the identity provider
    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    /// Bearer token was valid but has expired
    #[error("Token expired at {expired_at} (current time: {current_time})")]
    TokenExpired { expired_at: u64, current_time: u64 },

    /// Server lacks the secret required to verify this credential
    #[error("Server authentication is not configured: {what}")]
    NotConfigured { what: &'static str },

    /// Unexpected failure inside the resolver
    #[error("Authentication failed internally: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether this failure is the server's fault rather than the caller's.
    ///
    /// Optional-auth routes degrade to anonymous on these instead of failing.
    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::NotConfigured { .. } | AuthError::Internal(_))
    }
}

/// Errors raised by the transformation engine
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// Decoded bytes are not in a format this build can decode
    #[error("Unsupported image format: {reason}")]
    UnsupportedImageFormat { reason: String },

    /// Image bytes are corrupt or truncated
    #[error("Invalid image data: {message}")]
    InvalidImageData { message: String },

    /// Source or target dimensions exceed configured limits
    #[error("Invalid dimensions: {message}")]
    InvalidDimensions { message: String },

    /// Decoder or encoder ran out of its allocation budget
    #[error("Insufficient memory to process image: {message}")]
    InsufficientMemory { message: String },

    /// Encoder rejected the image
    #[error("Failed to encode image: {message}")]
    Encode { message: String },
}

/// Top-level error for every failure the HTTP layer can report.
///
/// Each variant is mapped to a status and machine-readable code by the
/// classifier in [`crate::server::classify`].
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Caller exhausted its fixed window
    #[error("Rate limit exceeded, retry after {} seconds", retry_after.as_secs())]
    RateLimited { retry_after: Duration, limit: u64 },

    /// Non-upload body exceeded its cap
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// JSON body could not be parsed
    #[error("Malformed JSON body: {message}")]
    InvalidJson { message: String },

    /// No route matched the request
    #[error("No route for {path}")]
    NotFound { path: String },

    /// A required dependency (worker pool, codec runtime) is unavailable
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// Operation exceeded its deadline
    #[error("Operation timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    /// Anything else
    #[error("Internal error: {message}")]
    Internal { message: String },
}
