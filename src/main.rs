//! imagesmith - an authenticated image transformation service.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use imagesmith::{
    config::{CheckConfig, Cli, Command, LogFormat, ServeConfig, TokenConfig, TokenOutputFormat},
    server::{
        create_router, run_readiness_checks, CheckOutcome, ReadinessReport, RouterConfig,
        TokenSigner,
    },
    transform::{default_workers, TransformEngine},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Token(config) => run_token(config),
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(&config.log_level, config.log_format);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let (engine, auth) = match build_components(&config) {
        Ok(components) => components,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("imagesmith v{}", env!("CARGO_PKG_VERSION"));
    log_configuration(&config);

    let router = create_router(engine, auth, build_router_config(&config));
    let addr = config.bind_address();

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on http://{}", addr);
    info!("  curl http://{}/health", addr);

    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

/// Print the effective configuration with secrets redacted.
fn log_configuration(config: &ServeConfig) {
    let set = |value: &Option<String>| if value.is_some() { "set" } else { "not set" };

    info!("Configuration:");
    info!(
        "  Environment: {}{}",
        config.environment,
        if error_traces(config) {
            " (error traces in responses)"
        } else {
            ""
        }
    );
    info!(
        "  Limits: upload {} bytes, json {} bytes, {} px, decode {} bytes",
        config.max_upload_size, config.json_body_limit, config.max_dimension, config.max_decode_bytes
    );
    info!(
        "  Rate limit: {} requests / {}s{}",
        config.rate_limit_capacity,
        config.rate_limit_window,
        if config.trust_forwarded {
            " (trusting X-Forwarded-For)"
        } else {
            ""
        }
    );
    info!(
        "  Workers: {}, transform timeout: {}",
        config.workers.unwrap_or_else(default_workers),
        config
            .transform_timeout_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "none".to_string())
    );
    info!(
        "  Token secret: {}, API key: {}, identity provider: {}",
        set(&config.token_secret),
        set(&config.api_key),
        config.identity_url.as_deref().unwrap_or("none")
    );
    if config.cors_any_origin() {
        warn!("  CORS: any origin");
    } else if config.cors_origins.is_empty() {
        info!("  CORS: no cross-origin access (set --cors-origins to allow browsers)");
    } else {
        info!("  CORS: {}", config.cors_origins.join(", "));
    }

    if config.auth_disabled() {
        warn!("  Auth: OPTIONAL - image endpoints accept anonymous callers");
        warn!("        Enable for production: --require-auth --token-secret=<secret>");
    } else {
        info!("  Auth: required");
    }
    if config.api_key.is_none() {
        warn!("  Admin API key not set - admin endpoints will answer 500");
    }
}

/// Initialize the tracing/logging subsystem.
///
/// `RUST_LOG` overrides `level`.
fn init_logging(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("imagesmith={level},tower_http={level}").into());

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn build_components(config: &ServeConfig) -> Result<(TransformEngine, imagesmith::AuthResolver), String> {
    let engine = TransformEngine::new(config.transform_settings()?);
    let auth = config.auth_resolver()?;
    Ok((engine, auth))
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_require_auth(config.require_auth)
        .with_max_upload_size(config.max_upload_size)
        .with_json_body_limit(config.json_body_limit)
        .with_security_headers(config.security_headers, config.hsts)
        .with_rate_limit(config.rate_limit())
        .with_trust_forwarded(config.trust_forwarded)
        .with_transform_timeout(config.transform_timeout())
        .with_token_ttl(Duration::from_secs(config.token_ttl))
        .with_tracing(!config.no_tracing)
        .with_error_traces(error_traces(config));

    if let Some(workers) = config.workers {
        router_config = router_config.with_workers(workers);
    }

    if config.cors_any_origin() {
        router_config = router_config.with_cors_any_origin();
    } else {
        router_config = router_config.with_cors_origins(config.cors_origins.clone());
    }

    router_config
}

/// Debug builds outside production put error traces in response bodies.
fn error_traces(config: &ServeConfig) -> bool {
    cfg!(debug_assertions) && !config.is_production()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

// =============================================================================
// Token Command
// =============================================================================

fn run_token(config: TokenConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let role = match config.parsed_role() {
        Ok(role) => role,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let signer = TokenSigner::new(&config.secret);
    let subject = config.subject.trim();
    let (token, expiry) = signer.issue(subject, role, Duration::from_secs(config.ttl));

    match config.format {
        TokenOutputFormat::Token => {
            println!("{}", token);
        }
        TokenOutputFormat::Json => {
            let expires_at = chrono::DateTime::from_timestamp(expiry as i64, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            let json = serde_json::json!({
                "token": token,
                "tokenType": "Bearer",
                "subject": subject,
                "role": role,
                "expiresAt": expires_at,
                "ttl": config.ttl,
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging("debug", config.serve.log_format);
    }

    println!("imagesmith Readiness Check");
    println!("══════════════════════════");
    println!();

    if let Err(e) = config.validate() {
        println!("✗ Configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let (engine, auth) = match build_components(&config.serve) {
        Ok((engine, auth)) => (Arc::new(engine), Arc::new(auth)),
        Err(e) => {
            println!("✗ Configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("✓ Configuration");

    let attempts = config.retries + 1;
    for attempt in 1..=attempts {
        println!();
        println!("Attempt {}/{}", attempt, attempts);

        let engine = Arc::clone(&engine);
        let auth = Arc::clone(&auth);
        let job = tokio::task::spawn_blocking(move || run_readiness_checks(&engine, &auth));

        match tokio::time::timeout(Duration::from_secs(config.timeout), job).await {
            Ok(Ok(report)) => {
                print_report(&report);
                if report.status.is_operational() {
                    println!();
                    println!("══════════════════════════");
                    println!("✓ Ready ({:?})", report.status);
                    return ExitCode::SUCCESS;
                }
            }
            Ok(Err(e)) => println!("✗ Checks failed to run: {}", e),
            Err(_) => println!("✗ Timed out after {}s", config.timeout),
        }

        if attempt < attempts {
            tokio::time::sleep(Duration::from_secs(config.interval)).await;
        }
    }

    println!();
    println!("══════════════════════════");
    println!("✗ Not ready");
    ExitCode::FAILURE
}

fn print_report(report: &ReadinessReport) {
    for check in &report.checks {
        let mark = match check.outcome {
            CheckOutcome::Pass => "✓",
            CheckOutcome::Warn => "!",
            CheckOutcome::Fail => "✗",
        };
        match &check.message {
            Some(message) => println!("  {} {}: {}", mark, check.name, message),
            None => println!("  {} {}", mark, check.name),
        }
    }
}
