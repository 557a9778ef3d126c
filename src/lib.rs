//! # imagesmith
//!
//! An authenticated image transformation service.
//!
//! Clients upload a single image over `multipart/form-data` and get back a
//! resized, recompressed, watermarked or format-converted image, or a JSON
//! description of the image. Images are processed entirely in memory and
//! never persisted.
//!
//! ## Features
//!
//! - **Five operations**: resize, compress, watermark, convert, metadata
//! - **Formats**: JPEG, PNG and WebP in and out; AVIF out
//! - **Authentication**: remote identity provider or local HS256 bearer tokens, plus an admin API key
//! - **Rate limiting**: fixed window per caller
//! - **Uniform errors**: every failure maps to one JSON envelope with a machine-readable code
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`transform`] - Decoding, the five operations and the bounded worker pool
//! - [`server`] - Axum-based HTTP server, auth, rate limiting and routes
//! - [`error`] - Error types shared by both layers
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use imagesmith::{create_router, AuthResolver, RouterConfig, TokenSigner, TransformEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let auth = AuthResolver::new()
//!         .with_token_signer(TokenSigner::new("change-me"))
//!         .with_api_key("admin-key");
//!     let router = create_router(TransformEngine::default(), auth, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod transform;

// Re-export commonly used types
pub use config::{Cli, Command, LogFormat, ServeConfig, TokenConfig, TokenOutputFormat, CheckConfig};
pub use error::{AuthError, ParamError, ServiceError, TransformError, UploadError};
pub use server::{
    create_dev_router, create_router, AppState, AuthPolicy, AuthResolver, ErrorResponse,
    HealthResponse, IdentityProvider, Principal, RateLimitConfig, RateLimiter, ReadinessReport,
    Role, RouterConfig, TokenSigner,
};
pub use transform::{
    ImageFormat, ImageMetadata, Operation, TransformEngine, TransformRequest, TransformResult,
    TransformSettings, WorkerPool,
};
