//! Configuration management for imagesmith.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap, with `serve`, `token` and `check` subcommands
//! - Environment variables with the `IMAGESMITH_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use imagesmith::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Token(config) => println!("Token for {}", config.subject),
//!     Command::Check(config) => println!("Checking {} times", config.retries),
//! }
//! ```
//!
//! # Environment Variables
//!
//! Every `serve` option has an environment variable, for example:
//!
//! - `IMAGESMITH_HOST` - Server bind address (default: 0.0.0.0)
//! - `IMAGESMITH_PORT` - Server port (default: 3000)
//! - `IMAGESMITH_TOKEN_SECRET` - HMAC secret for local bearer tokens
//! - `IMAGESMITH_IDENTITY_URL` - Remote identity provider endpoint
//! - `IMAGESMITH_API_KEY` - Admin API key
//! - `IMAGESMITH_REQUIRE_AUTH` - Reject anonymous image requests (default: false)
//! - `IMAGESMITH_MAX_UPLOAD_SIZE` - Upload ceiling in bytes (default: 50 MiB)
//! - `IMAGESMITH_RATE_LIMIT_CAPACITY` - Requests per window (default: 100)
//! - `IMAGESMITH_LOG_FORMAT` - `text` or `json` (default: text)

use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use url::Url;

use crate::server::{
    AuthResolver, HttpIdentityProvider, RateLimitConfig, Role, TokenSigner,
    DEFAULT_JSON_BODY_LIMIT, DEFAULT_MAX_FILE_SIZE, DEFAULT_RATE_LIMIT_CAPACITY, MAX_TOKEN_TTL,
};
use crate::transform::{
    Color, DecodeLimits, Position, TransformSettings, WatermarkDefaults, DEFAULT_AVIF_SPEED,
    DEFAULT_MAX_DECODE_BYTES, DEFAULT_MAX_DIMENSION, DEFAULT_MAX_FONT_SIZE,
    DEFAULT_PNG_COMPRESSION,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Default token lifetime in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Default rate-limit window in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// imagesmith - an authenticated image transformation service.
///
/// Resizes, compresses, watermarks and converts uploaded images, and reports
/// their metadata.
#[derive(Parser, Debug, Clone)]
#[command(name = "imagesmith")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options for `serve` when no subcommand is given.
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// The subcommand to run; bare `imagesmith` means `serve`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeConfig),

    /// Issue a local bearer token
    Token(TokenConfig),

    /// Run the readiness checks and exit 0 (ready) or 1 (not ready)
    Check(CheckConfig),
}

/// Output of `imagesmith token`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenOutputFormat {
    /// The bare token
    #[default]
    Token,
    /// A JSON object with the token and its expiry
    Json,
}

/// Log output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMAGESMITH_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IMAGESMITH_PORT")]
    pub port: u16,

    /// Deployment environment name.
    ///
    /// `production` keeps error traces out of response bodies even in debug
    /// builds.
    #[arg(long, default_value = "development", env = "IMAGESMITH_ENVIRONMENT")]
    pub environment: String,

    /// HTTP Cache-Control max-age for transformed images, in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "IMAGESMITH_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Secret for signing and verifying local bearer tokens.
    #[arg(long, env = "IMAGESMITH_TOKEN_SECRET")]
    pub token_secret: Option<String>,

    /// Default lifetime of issued tokens, in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS, env = "IMAGESMITH_TOKEN_TTL")]
    pub token_ttl: u64,

    /// Remote identity provider endpoint. When set, bearer tokens are
    /// validated there instead of locally.
    #[arg(long, env = "IMAGESMITH_IDENTITY_URL")]
    pub identity_url: Option<String>,

    /// API key sent to the identity provider.
    #[arg(long, env = "IMAGESMITH_IDENTITY_API_KEY")]
    pub identity_api_key: Option<String>,

    /// Identity provider request timeout, in seconds.
    #[arg(long, default_value_t = 5, env = "IMAGESMITH_IDENTITY_TIMEOUT")]
    pub identity_timeout: u64,

    /// API key for administrative routes.
    #[arg(long, env = "IMAGESMITH_API_KEY")]
    pub api_key: Option<String>,

    /// Reject anonymous callers on image routes.
    #[arg(long, default_value_t = false, env = "IMAGESMITH_REQUIRE_AUTH")]
    pub require_auth: bool,

    // =========================================================================
    // Limits
    // =========================================================================
    /// Upload ceiling in bytes (inclusive).
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE, env = "IMAGESMITH_MAX_UPLOAD_SIZE")]
    pub max_upload_size: usize,

    /// Cap on JSON request bodies in bytes.
    #[arg(long, default_value_t = DEFAULT_JSON_BODY_LIMIT, env = "IMAGESMITH_JSON_BODY_LIMIT")]
    pub json_body_limit: usize,

    /// Largest accepted source or output width/height in pixels.
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION, env = "IMAGESMITH_MAX_DIMENSION")]
    pub max_dimension: u32,

    /// Decoder allocation ceiling in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_DECODE_BYTES, env = "IMAGESMITH_MAX_DECODE_BYTES")]
    pub max_decode_bytes: u64,

    /// Fixed rate-limit window, in seconds.
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_WINDOW_SECS, env = "IMAGESMITH_RATE_LIMIT_WINDOW")]
    pub rate_limit_window: u64,

    /// Requests allowed per caller per window.
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_CAPACITY, env = "IMAGESMITH_RATE_LIMIT_CAPACITY")]
    pub rate_limit_capacity: u64,

    /// Key anonymous callers by the first X-Forwarded-For entry.
    ///
    /// Only enable behind a proxy that sets the header.
    #[arg(long, default_value_t = false, env = "IMAGESMITH_TRUST_FORWARDED")]
    pub trust_forwarded: bool,

    // =========================================================================
    // Watermark Defaults
    // =========================================================================
    /// Default watermark corner.
    #[arg(long, default_value = "bottom-right", env = "IMAGESMITH_WATERMARK_POSITION")]
    pub watermark_position: String,

    /// Default watermark opacity (0-1).
    #[arg(long, default_value_t = 0.5, env = "IMAGESMITH_WATERMARK_OPACITY")]
    pub watermark_opacity: f32,

    /// Default watermark font size in pixels.
    #[arg(long, default_value_t = 48, env = "IMAGESMITH_WATERMARK_FONT_SIZE")]
    pub watermark_font_size: u32,

    /// Default watermark color.
    #[arg(long, default_value = "#ffffff", env = "IMAGESMITH_WATERMARK_COLOR")]
    pub watermark_color: String,

    // =========================================================================
    // Encoding and Workers
    // =========================================================================
    /// PNG compression effort (0-9).
    #[arg(long, default_value_t = DEFAULT_PNG_COMPRESSION, env = "IMAGESMITH_PNG_COMPRESSION")]
    pub png_compression: u8,

    /// AVIF encoder speed (1-10, higher is faster).
    #[arg(long, default_value_t = DEFAULT_AVIF_SPEED, env = "IMAGESMITH_AVIF_SPEED")]
    pub avif_speed: u8,

    /// Transform worker count (default: available cores).
    #[arg(long, env = "IMAGESMITH_WORKERS")]
    pub workers: Option<usize>,

    /// Deadline for a single transform, in milliseconds (default: none).
    #[arg(long, env = "IMAGESMITH_TRANSFORM_TIMEOUT_MS")]
    pub transform_timeout_ms: Option<u64>,

    // =========================================================================
    // HTTP Surface
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, cross-origin requests are refused. `*` allows any
    /// origin.
    #[arg(long, env = "IMAGESMITH_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Add security response headers.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "IMAGESMITH_SECURITY_HEADERS")]
    pub security_headers: bool,

    /// Add Strict-Transport-Security.
    #[arg(long, default_value_t = false, env = "IMAGESMITH_HSTS")]
    pub hsts: bool,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Log level filter; RUST_LOG takes precedence.
    #[arg(long, default_value = "info", env = "IMAGESMITH_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "IMAGESMITH_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }
        if self.max_upload_size == 0 {
            return Err("max_upload_size must be greater than 0".to_string());
        }
        if self.json_body_limit == 0 {
            return Err("json_body_limit must be greater than 0".to_string());
        }
        if self.max_dimension == 0 {
            return Err("max_dimension must be greater than 0".to_string());
        }
        if self.max_decode_bytes == 0 {
            return Err("max_decode_bytes must be greater than 0".to_string());
        }
        if self.rate_limit_window == 0 || self.rate_limit_capacity == 0 {
            return Err("rate limit window and capacity must be greater than 0".to_string());
        }
        if self.token_ttl == 0 || self.token_ttl > MAX_TOKEN_TTL.as_secs() {
            return Err(format!(
                "token_ttl must be between 1 and {} seconds",
                MAX_TOKEN_TTL.as_secs()
            ));
        }
        if self.identity_timeout == 0 {
            return Err("identity_timeout must be greater than 0".to_string());
        }
        if self.workers == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        if self.transform_timeout_ms == Some(0) {
            return Err("transform_timeout_ms must be greater than 0".to_string());
        }

        if self.png_compression > 9 {
            return Err("png_compression must be between 0 and 9".to_string());
        }
        if !(1..=10).contains(&self.avif_speed) {
            return Err("avif_speed must be between 1 and 10".to_string());
        }

        if !(0.0..=1.0).contains(&self.watermark_opacity) {
            return Err("watermark_opacity must be between 0 and 1".to_string());
        }
        if self.watermark_font_size == 0 || self.watermark_font_size > DEFAULT_MAX_FONT_SIZE {
            return Err(format!(
                "watermark_font_size must be between 1 and {}",
                DEFAULT_MAX_FONT_SIZE
            ));
        }
        self.watermark_defaults()?;

        if let Some(url) = &self.identity_url {
            parse_identity_url(url)?;
        }

        if self.require_auth && self.token_secret.is_none() && self.identity_url.is_none() {
            return Err(
                "Authentication is required but no verifier is configured. \
                 Set --token-secret or --identity-url"
                    .to_string(),
            );
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// Whether `*` appears among the CORS origins.
    pub fn cors_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o.trim() == "*")
    }

    /// Whether image routes are effectively open to anyone.
    pub fn auth_disabled(&self) -> bool {
        !self.require_auth || (self.token_secret.is_none() && self.identity_url.is_none())
    }

    pub fn watermark_defaults(&self) -> Result<WatermarkDefaults, String> {
        let position = Position::parse(&self.watermark_position).ok_or_else(|| {
            format!(
                "invalid watermark_position '{}' (expected top-left, top-right, bottom-left or bottom-right)",
                self.watermark_position
            )
        })?;
        let color = Color::parse(&self.watermark_color)
            .ok_or_else(|| format!("invalid watermark_color '{}'", self.watermark_color))?;

        Ok(WatermarkDefaults {
            position,
            opacity: self.watermark_opacity,
            font_size: self.watermark_font_size,
            color,
        })
    }

    /// Engine settings. Call `validate()` first.
    pub fn transform_settings(&self) -> Result<TransformSettings, String> {
        Ok(TransformSettings {
            decode: DecodeLimits {
                max_dimension: self.max_dimension,
                max_alloc: self.max_decode_bytes,
            },
            png_compression: self.png_compression,
            avif_speed: self.avif_speed,
            max_font_size: DEFAULT_MAX_FONT_SIZE,
            watermark: self.watermark_defaults()?,
        })
    }

    /// Build the auth resolver from the configured credentials.
    pub fn auth_resolver(&self) -> Result<AuthResolver, String> {
        let mut resolver = AuthResolver::new();

        if let Some(secret) = &self.token_secret {
            resolver = resolver.with_token_signer(TokenSigner::new(secret));
        }
        if let Some(key) = &self.api_key {
            resolver = resolver.with_api_key(key.clone());
        }
        if let Some(url) = &self.identity_url {
            let provider = HttpIdentityProvider::new(
                parse_identity_url(url)?,
                self.identity_api_key.clone(),
                Duration::from_secs(self.identity_timeout),
            )?;
            resolver = resolver.with_identity_provider(Arc::new(provider));
        }

        Ok(resolver)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            capacity: self.rate_limit_capacity,
            window: Duration::from_secs(self.rate_limit_window),
        }
    }

    pub fn transform_timeout(&self) -> Option<Duration> {
        self.transform_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_identity_url(value: &str) -> Result<Url, String> {
    let url = Url::parse(value).map_err(|e| format!("invalid identity_url '{}': {}", value, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!(
            "identity_url must use http or https, got '{}'",
            other
        )),
    }
}

// =============================================================================
// Token
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct TokenConfig {
    /// Signing secret; must match the server's token secret.
    #[arg(long, env = "IMAGESMITH_TOKEN_SECRET")]
    pub secret: String,

    /// Subject (caller id) the token is issued to.
    #[arg(long)]
    pub subject: String,

    /// Role claim: user or admin.
    #[arg(long, default_value = "user")]
    pub role: String,

    /// Lifetime in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS)]
    pub ttl: u64,

    /// Output format.
    #[arg(long, value_enum, default_value_t = TokenOutputFormat::Token)]
    pub format: TokenOutputFormat,
}

impl TokenConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("Secret must not be empty. Set --secret or IMAGESMITH_TOKEN_SECRET".to_string());
        }
        if self.subject.trim().is_empty() {
            return Err("Subject must not be empty".to_string());
        }
        self.parsed_role()?;
        if self.ttl == 0 || self.ttl > MAX_TOKEN_TTL.as_secs() {
            return Err(format!(
                "ttl must be between 1 and {} seconds",
                MAX_TOKEN_TTL.as_secs()
            ));
        }
        Ok(())
    }

    pub fn parsed_role(&self) -> Result<Role, String> {
        match Role::parse(&self.role) {
            Some(Role::Anonymous) | None => {
                Err(format!("invalid role '{}' (expected user or admin)", self.role))
            }
            Some(role) => Ok(role),
        }
    }
}

// =============================================================================
// Check
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub serve: ServeConfig,

    /// Per-attempt timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Delay between attempts, in seconds.
    #[arg(long, default_value_t = 2)]
    pub interval: u64,

    /// Number of retries after the first failed attempt.
    #[arg(long, default_value_t = 2)]
    pub retries: u32,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout == 0 {
            return Err("timeout must be greater than 0".to_string());
        }
        self.serve.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
