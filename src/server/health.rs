//! Liveness and readiness reporting.
//!
//! Liveness (`GET /health`) only says the process is serving. Readiness
//! runs dependency checks and is shared by `GET /api/admin/health` and the
//! `check` subcommand.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::transform::TransformEngine;

use super::auth::AuthResolver;

/// Service name reported by health endpoints.
pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

// =============================================================================
// Liveness
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Resident set size, when the platform exposes it
    pub rss_bytes: Option<u64>,
}

/// Liveness response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub memory: MemoryUsage,
}

impl HealthResponse {
    pub fn alive(started_at: Instant) -> Self {
        Self {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            uptime_seconds: started_at.elapsed().as_secs(),
            memory: MemoryUsage {
                rss_bytes: resident_memory(),
            },
        }
    }
}

/// Read `VmRSS` from `/proc/self/status`.
pub fn resident_memory() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib * 1024)
}

// =============================================================================
// Readiness
// =============================================================================

/// Overall readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Warn,
    Fail,
}

/// Result of one readiness check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: String,
    pub outcome: CheckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: CheckOutcome::Pass,
            message: None,
            duration_ms: None,
        }
    }

    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: CheckOutcome::Warn,
            message: Some(message.into()),
            duration_ms: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: CheckOutcome::Fail,
            message: Some(message.into()),
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Readiness report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
}

impl ReadinessReport {
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let status = if checks.iter().any(|c| c.outcome == CheckOutcome::Fail) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.outcome == CheckOutcome::Warn) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            checks,
        }
    }
}

/// Run every readiness check.
///
/// The codec probe is CPU-bound; callers on the async runtime should run
/// this on a blocking thread.
pub fn run_readiness_checks(engine: &TransformEngine, auth: &AuthResolver) -> ReadinessReport {
    let mut checks = Vec::with_capacity(4);

    let start = Instant::now();
    let codec = match engine.probe_codecs() {
        Ok(()) => CheckResult::pass("codec"),
        Err(e) => CheckResult::fail("codec", e.to_string()),
    };
    checks.push(codec.with_duration(start.elapsed()));

    checks.push(if auth.can_verify_tokens() {
        CheckResult::pass("token-verification")
    } else {
        CheckResult::fail(
            "token-verification",
            "neither a token secret nor an identity provider is configured",
        )
    });

    checks.push(if auth.has_api_key() {
        CheckResult::pass("admin-key")
    } else {
        CheckResult::fail("admin-key", "no admin API key is configured")
    });

    checks.push(match auth.identity_provider() {
        Some(provider) => CheckResult::pass("identity-provider").with_message(provider.describe()),
        None => CheckResult::warn(
            "identity-provider",
            "no remote identity provider, bearer tokens are verified locally",
        ),
    });

    ReadinessReport::from_checks(checks)
}
