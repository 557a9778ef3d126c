//! HTTP server layer for imagesmith.
//!
//! This module provides the HTTP API in front of the transformation engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │              POST /api/images/{operation}                       │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │    auth     │  │ rate_limit  │  │        upload           │  │
//! │  │ (principal) │  │(fixed window│  │  (multipart, allow-list)│  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │  classify   │  │        routes           │  │
//! │  │ (requests)  │  │ (envelope)  │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod classify;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod token;
pub mod upload;

pub use auth::{
    auth_middleware, AuthGate, AuthPolicy, AuthResolver, AuthStrategy, Principal,
    Role, API_KEY_HEADER,
};
pub use classify::{classify, Classification, ErrorReport, ErrorResponse};
pub use handlers::{AppState, TokenRequest, TokenResponse, MAX_TOKEN_TTL};
pub use health::{
    run_readiness_checks, CheckOutcome, CheckResult, HealthResponse, HealthStatus,
    ReadinessReport,
};
pub use identity::{HttpIdentityProvider, IdentityProvider, DEFAULT_IDENTITY_TIMEOUT};
pub use rate_limit::{
    Clock, ManualClock, RateDecision, RateLimitConfig, RateLimiter, SystemClock,
    DEFAULT_RATE_LIMIT_CAPACITY, DEFAULT_RATE_LIMIT_WINDOW,
};
pub use routes::{create_dev_router, create_router, RouterConfig, DEFAULT_JSON_BODY_LIMIT};
pub use token::{TokenClaims, TokenSigner, DEFAULT_TOKEN_TTL};
pub use upload::{UploadLimits, UploadedAsset, DEFAULT_MAX_FILE_SIZE};
