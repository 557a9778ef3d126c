//! Router configuration for imagesmith.
//!
//! This module defines the HTTP routes and applies middleware for
//! authentication, rate limiting, auditing, security headers and CORS.
//!
//! # Route Structure
//!
//! ```text
//! /health                          - Liveness (public)
//! /api/images/{operation}          - Transform endpoints (Optional or Required auth, rate limited)
//! /api/admin/health                - Readiness (API key)
//! /api/admin/tokens                - Token issuance (API key)
//! ```
//!
//! # Layer Order
//!
//! Outermost first: trace, audit, security headers, CORS, error traces, then
//! per-route layers: the client-IP limiter, auth and the caller limiter.
//! Preflight requests are answered by CORS and never reach auth. `/health`
//! has no per-route layers.
//!
//! CORS refuses cross-origin reads unless origins are configured.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use imagesmith::server::{create_router, AuthResolver, RouterConfig};
//! use imagesmith::transform::TransformEngine;
//!
//! let auth = AuthResolver::new().with_api_key("admin-key");
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(TransformEngine::default(), auth, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, AuthGate, AuthPolicy, AuthResolver, API_KEY_HEADER};
use super::handlers::{
    compress_handler, convert_handler, health_handler, issue_token_handler, metadata_handler,
    not_found_handler, readiness_handler, resize_handler, watermark_handler, AppState,
};
use super::middleware::{audit_middleware, error_trace_middleware, security_headers};
use super::rate_limit::{
    client_rate_limit_middleware, rate_limit_middleware, RateLimitConfig, RateLimitGate,
    RateLimiter,
};
use super::token::DEFAULT_TOKEN_TTL;
use super::upload::{UploadLimits, DEFAULT_MAX_FILE_SIZE};
use crate::transform::{default_workers, TransformEngine, WorkerPool};

/// Default cap on JSON bodies (1 MiB).
pub const DEFAULT_JSON_BODY_LIMIT: usize = 1024 * 1024;

/// Room for multipart framing and text fields on top of the file ceiling.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (empty = no cross-origin access)
    pub cors_origins: Vec<String>,

    /// Allow any CORS origin, overriding `cors_origins`
    pub cors_any_origin: bool,

    /// Cache-Control max-age for transformed images, in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Whether error envelopes carry the error's debug representation
    pub expose_error_traces: bool,

    /// Image routes reject anonymous callers when set
    pub require_auth: bool,

    /// Upload ceiling in bytes, inclusive
    pub max_upload_size: usize,

    /// Cap on JSON request bodies in bytes
    pub json_body_limit: usize,

    /// Whether to add the security response headers
    pub security_headers: bool,

    /// Whether to add `Strict-Transport-Security`
    pub hsts: bool,

    /// Fixed-window limiter settings
    pub rate_limit: RateLimitConfig,

    /// Pre-built limiter, for callers that need a custom clock
    pub rate_limiter: Option<Arc<RateLimiter>>,

    /// Key anonymous callers by `X-Forwarded-For`
    pub trust_forwarded: bool,

    /// Size of the transform worker pool
    pub workers: usize,

    /// Deadline for a single transform (None = no deadline)
    pub transform_timeout: Option<Duration>,

    /// Lifetime of tokens issued without an explicit TTL
    pub token_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a router configuration with default settings.
    ///
    /// By default:
    /// - Image routes accept anonymous callers
    /// - CORS refuses cross-origin requests
    /// - Uploads up to 50 MiB, JSON bodies up to 1 MiB
    /// - 100 requests per caller per hour
    /// - Security headers on, HSTS off
    /// - Tracing is enabled; error traces only in debug builds
    pub fn new() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_any_origin: false,
            cache_max_age: 3600,
            enable_tracing: true,
            expose_error_traces: cfg!(debug_assertions),
            require_auth: false,
            max_upload_size: DEFAULT_MAX_FILE_SIZE,
            json_body_limit: DEFAULT_JSON_BODY_LIMIT,
            security_headers: true,
            hsts: false,
            rate_limit: RateLimitConfig::default(),
            rate_limiter: None,
            trust_forwarded: false,
            workers: default_workers(),
            transform_timeout: None,
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self.cors_any_origin = false;
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_any_origin = true;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    pub fn with_error_traces(mut self, enabled: bool) -> Self {
        self.expose_error_traces = enabled;
        self
    }

    /// Require a valid bearer token on image routes.
    pub fn with_require_auth(mut self, required: bool) -> Self {
        self.require_auth = required;
        self
    }

    pub fn with_max_upload_size(mut self, bytes: usize) -> Self {
        self.max_upload_size = bytes;
        self
    }

    pub fn with_json_body_limit(mut self, bytes: usize) -> Self {
        self.json_body_limit = bytes;
        self
    }

    pub fn with_security_headers(mut self, enabled: bool, hsts: bool) -> Self {
        self.security_headers = enabled;
        self.hsts = hsts;
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Use an existing limiter instead of building one from `rate_limit`.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_trust_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_transform_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transform_timeout = timeout;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    fn image_policy(&self) -> AuthPolicy {
        if self.require_auth {
            AuthPolicy::Required
        } else {
            AuthPolicy::Optional
        }
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// This function builds the complete Axum router with:
/// - Public liveness route
/// - Image and admin routes behind the client-IP limiter, counted before
///   auth so failed credentials are limited too
/// - Image routes behind auth and the caller limiter
/// - Admin routes behind the API key and the caller limiter
/// - Auditing, security headers and CORS
/// - Request tracing (optional)
pub fn create_router(engine: TransformEngine, auth: AuthResolver, config: RouterConfig) -> Router {
    let engine = Arc::new(engine);
    let auth = Arc::new(auth);

    let app_state = AppState {
        pool: WorkerPool::new(config.workers).with_timeout(config.transform_timeout),
        upload_limits: UploadLimits {
            max_file_size: config.max_upload_size,
        },
        json_body_limit: config.json_body_limit,
        cache_max_age: config.cache_max_age,
        token_ttl: config.token_ttl,
        ..AppState::new(engine, Arc::clone(&auth))
    };

    let limiter = config
        .rate_limiter
        .clone()
        .unwrap_or_else(|| Arc::new(RateLimiter::new(config.rate_limit)));
    let rate_limit = RateLimitGate {
        limiter,
        trust_forwarded: config.trust_forwarded,
    };

    let protected = Router::new()
        .merge(build_image_routes(
            app_state.clone(),
            AuthGate::new(Arc::clone(&auth), config.image_policy()),
            rate_limit.clone(),
            &config,
        ))
        .merge(build_admin_routes(
            app_state.clone(),
            AuthGate::new(auth, AuthPolicy::ApiKey),
            rate_limit.clone(),
            &config,
        ))
        .route_layer(middleware::from_fn_with_state(
            rate_limit,
            client_rate_limit_middleware,
        ));

    let router = Router::new()
        .merge(protected)
        .merge(
            Router::new()
                .route("/health", get(health_handler))
                .with_state(app_state),
        )
        .fallback(not_found_handler);

    apply_common_layers(router, &config)
}

/// Transform routes. Rate limiting runs inside auth so the principal is known.
fn build_image_routes(
    app_state: AppState,
    auth: AuthGate,
    rate_limit: RateLimitGate,
    config: &RouterConfig,
) -> Router {
    Router::new()
        .route("/api/images/resize", post(resize_handler))
        .route("/api/images/compress", post(compress_handler))
        .route("/api/images/watermark", post(watermark_handler))
        .route("/api/images/convert", post(convert_handler))
        .route("/api/images/metadata", post(metadata_handler))
        .route_layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(auth, auth_middleware))
        .layer(DefaultBodyLimit::max(
            config.max_upload_size.saturating_add(MULTIPART_OVERHEAD),
        ))
        .with_state(app_state)
}

fn build_admin_routes(
    app_state: AppState,
    auth: AuthGate,
    rate_limit: RateLimitGate,
    config: &RouterConfig,
) -> Router {
    Router::new()
        .route("/api/admin/health", get(readiness_handler))
        .route("/api/admin/tokens", post(issue_token_handler))
        .route_layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(auth, auth_middleware))
        .layer(DefaultBodyLimit::max(config.json_body_limit))
        .with_state(app_state)
}

fn apply_common_layers(mut router: Router, config: &RouterConfig) -> Router {
    if config.expose_error_traces {
        router = router.layer(middleware::from_fn(error_trace_middleware));
    }

    router = router.layer(build_cors_layer(config));

    if config.security_headers {
        for (name, value) in security_headers(config.hsts) {
            router = router.layer(SetResponseHeaderLayer::if_not_present(name, value));
        }
    }

    router = router.layer(middleware::from_fn(audit_middleware));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([
            RETRY_AFTER,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-original-size"),
            HeaderName::from_static("x-compressed-size"),
            HeaderName::from_static("x-compression-ratio"),
        ])
        .max_age(Duration::from_secs(86400));

    if config.cors_any_origin || config.cors_origins.iter().any(|o| o.trim() == "*") {
        return cors.allow_origin(Any);
    }

    // An empty list matches no origin, so no allow-origin header is sent
    let parsed_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.trim().parse().ok())
        .collect();
    cors.allow_origin(AllowOrigin::list(parsed_origins))
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Create a development router: default engine, no credentials configured,
/// any CORS origin, tracing off.
///
/// **Warning**: Admin routes answer 500 without an API key. Never use this in
/// production.
pub fn create_dev_router() -> Router {
    create_router(
        TransformEngine::default(),
        AuthResolver::new(),
        RouterConfig::new()
            .with_cors_any_origin()
            .with_tracing(false),
    )
}

// =============================================================================
// Tests
// =============================================================================
