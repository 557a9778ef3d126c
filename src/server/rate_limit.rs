//! Fixed-window rate limiting.
//!
//! Each caller gets `capacity` requests per `window`. The window for a key
//! starts with its first request and resets once it has fully elapsed. The
//! limiter never blocks: callers over the limit are told how long to wait.
//!
//! Two gates share one limiter:
//!
//! - [`client_rate_limit_middleware`] runs before auth and keys by client IP,
//!   so requests with bad credentials are counted too. Requests that end up
//!   authenticated are refunded.
//! - [`rate_limit_middleware`] runs after auth and keys by principal id when
//!   authenticated, by client IP otherwise.
//!
//! State lives in process memory, so each instance of a multi-instance
//! deployment enforces its own budget.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ServiceError;

use super::auth::Principal;

/// Default requests allowed per window.
pub const DEFAULT_RATE_LIMIT_CAPACITY: u64 = 100;

/// Default window length (one hour).
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(3600);

/// Key prefix for the pre-auth gate, keeping its buckets apart from the
/// post-auth ones.
const PRE_AUTH_PREFIX: &str = "pre-auth:";

/// Expired windows are swept once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 10_000;

// =============================================================================
// Clock
// =============================================================================

/// Time source for the limiter.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Limiter
// =============================================================================

/// Limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub capacity: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RATE_LIMIT_CAPACITY,
            window: DEFAULT_RATE_LIMIT_WINDOW,
        }
    }
}

/// Outcome of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: u64, remaining: u64 },
    Denied { retry_after: Duration, limit: u64 },
}

#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    started: Instant,
    count: u64,
}

/// Per-key fixed-window counter.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: RateLimitConfig {
                capacity: config.capacity.max(1),
                window: config.window.max(Duration::from_secs(1)),
            },
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Count one request against `key`.
    pub async fn try_acquire(&self, key: &str) -> RateDecision {
        let now = self.clock.now();
        let RateLimitConfig { capacity, window } = self.config;
        let mut windows = self.windows.lock().await;

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows
            .entry(key.to_string())
            .or_insert(RateLimitWindow {
                started: now,
                count: 0,
            });

        if now.duration_since(entry.started) >= window {
            *entry = RateLimitWindow {
                started: now,
                count: 0,
            };
        }

        if entry.count >= capacity {
            let elapsed = now.duration_since(entry.started);
            return RateDecision::Denied {
                retry_after: retry_after(window, elapsed),
                limit: capacity,
            };
        }

        entry.count += 1;
        RateDecision::Allowed {
            limit: capacity,
            remaining: capacity - entry.count,
        }
    }

    /// Give back one request counted against `key` in its current window.
    pub async fn release(&self, key: &str) {
        let mut windows = self.windows.lock().await;
        if let Some(entry) = windows.get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    /// Number of keys currently tracked.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

/// Remaining window time rounded up to whole seconds, within `1..=window`.
fn retry_after(window: Duration, elapsed: Duration) -> Duration {
    let remaining = window.saturating_sub(elapsed);
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    Duration::from_secs(secs.clamp(1, window.as_secs().max(1)))
}

// =============================================================================
// Axum Middleware
// =============================================================================

/// Middleware state.
#[derive(Debug, Clone)]
pub struct RateLimitGate {
    pub limiter: Arc<RateLimiter>,
    /// Key anonymous callers by the first `X-Forwarded-For` entry.
    pub trust_forwarded: bool,
}

/// Axum middleware enforcing the limiter.
///
/// Must run inside the auth middleware so the principal is known.
pub async fn rate_limit_middleware(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let key = caller_key(&request, gate.trust_forwarded);

    match gate.limiter.try_acquire(&key).await {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            Ok(response)
        }
        RateDecision::Denied { retry_after, limit } => {
            debug!(key = %key, retry_after = retry_after.as_secs(), "Rate limit exceeded");
            Err(ServiceError::RateLimited { retry_after, limit })
        }
    }
}

/// Axum middleware counting every request by client IP before auth runs.
///
/// The count is refunded once auth accepts the caller, so authenticated
/// traffic is only metered by [`rate_limit_middleware`].
pub async fn client_rate_limit_middleware(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let key = format!("{}{}", PRE_AUTH_PREFIX, client_key(&request, gate.trust_forwarded));

    match gate.limiter.try_acquire(&key).await {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;

            let authenticated = response
                .extensions()
                .get::<Principal>()
                .is_some_and(|p| p.is_authenticated);
            if authenticated {
                gate.limiter.release(&key).await;
            }

            let headers = response.headers_mut();
            headers
                .entry("x-ratelimit-limit")
                .or_insert(HeaderValue::from(limit));
            headers
                .entry("x-ratelimit-remaining")
                .or_insert(HeaderValue::from(remaining));
            Ok(response)
        }
        RateDecision::Denied { retry_after, limit } => {
            debug!(key = %key, retry_after = retry_after.as_secs(), "Pre-auth rate limit exceeded");
            Err(ServiceError::RateLimited { retry_after, limit })
        }
    }
}

/// Limiter key for a request.
pub fn caller_key(request: &Request, trust_forwarded: bool) -> String {
    if let Some(principal) = request.extensions().get::<Principal>() {
        if principal.is_authenticated {
            return format!("principal:{}", principal.id);
        }
    }
    client_key(request, trust_forwarded)
}

/// Limiter key for the client address, ignoring any credentials.
pub fn client_key(request: &Request, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return format!("ip:{}", ip);
        }
    }

    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
