//! Caller authentication.
//!
//! Every request is resolved into exactly one [`Principal`] before a route
//! body runs. Resolution is a two-step state machine:
//!
//! 1. **Select** an [`AuthStrategy`] from the route's [`AuthPolicy`], the
//!    request headers and what the server has configured.
//! 2. **Resolve** that strategy into a principal, or a failure that
//!    short-circuits the request.
//!
//! # Strategies
//!
//! | Policy     | Credentials                 | Strategy                        |
//! |------------|-----------------------------|---------------------------------|
//! | `Optional` | none                        | `Anonymous`                     |
//! | `Required` | none                        | 401 `AUTHENTICATION_REQUIRED`   |
//! | any bearer | `Authorization: Bearer ...` | `RemoteBearer` or `LocalBearer` |
//! | `ApiKey`   | `X-API-Key: ...`            | `ApiKey`                        |
//!
//! A remote identity provider takes precedence over the local token secret.
//! On `Optional` routes, server-side failures (missing secret, internal
//! errors) degrade to anonymous with a warning; bad credentials still fail.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::{AuthError, ServiceError};

use super::identity::IdentityProvider;
use super::token::TokenSigner;

/// Header carrying the administrative API key.
pub const API_KEY_HEADER: &str = "x-api-key";

// =============================================================================
// Principal
// =============================================================================

/// What a caller is allowed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Anonymous,
    User,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anonymous" => Some(Role::Anonymous),
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved caller of one request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub is_authenticated: bool,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            role: Role::Anonymous,
            is_authenticated: false,
        }
    }

    pub fn authenticated(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            is_authenticated: true,
        }
    }
}

/// Handlers read the principal the middleware attached. Routes mounted
/// without the middleware see an anonymous caller.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Principal>()
            .cloned()
            .unwrap_or_else(Principal::anonymous))
    }
}

// =============================================================================
// Policy and strategy
// =============================================================================

/// Per-route authentication requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Credentials are checked if present; absent means anonymous.
    Optional,
    /// A valid bearer token is required.
    Required,
    /// The administrative API key is required.
    ApiKey,
}

/// How a particular request will be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy<'a> {
    RemoteBearer(&'a str),
    LocalBearer(&'a str),
    ApiKey(&'a str),
    Anonymous,
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves requests into principals using whatever the server configured.
#[derive(Clone, Default)]
pub struct AuthResolver {
    remote: Option<Arc<dyn IdentityProvider>>,
    local: Option<TokenSigner>,
    api_key: Option<String>,
}

impl std::fmt::Debug for AuthResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResolver")
            .field("remote", &self.remote.as_ref().map(|p| p.describe()))
            .field("local", &self.local.is_some())
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

impl AuthResolver {
    /// A resolver with nothing configured: every caller is anonymous and
    /// credentialed routes report a configuration error.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.remote = Some(provider);
        self
    }

    pub fn with_token_signer(mut self, signer: TokenSigner) -> Self {
        self.local = Some(signer);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Whether bearer tokens can be verified at all.
    pub fn can_verify_tokens(&self) -> bool {
        self.remote.is_some() || self.local.is_some()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn identity_provider(&self) -> Option<&Arc<dyn IdentityProvider>> {
        self.remote.as_ref()
    }

    /// Signer used to mint local tokens, if configured.
    pub fn token_signer(&self) -> Option<&TokenSigner> {
        self.local.as_ref()
    }

    /// Pick a strategy for a request. Performs no I/O.
    pub fn select<'a>(
        &self,
        policy: AuthPolicy,
        headers: &'a HeaderMap,
    ) -> Result<AuthStrategy<'a>, AuthError> {
        if policy == AuthPolicy::ApiKey {
            if self.api_key.is_none() {
                return Err(AuthError::NotConfigured {
                    what: "admin API key",
                });
            }
            let key = headers
                .get(API_KEY_HEADER)
                .ok_or(AuthError::MissingApiKey)?
                .to_str()
                .map_err(|_| AuthError::InvalidApiKey)?;
            return Ok(AuthStrategy::ApiKey(key));
        }

        let Some(value) = headers.get(AUTHORIZATION) else {
            return match policy {
                AuthPolicy::Required => Err(AuthError::MissingCredentials),
                _ => Ok(AuthStrategy::Anonymous),
            };
        };

        let token = bearer_token(value.to_str().map_err(|_| AuthError::InvalidToken {
            reason: "authorization header is not valid text".to_string(),
        })?)?;

        if self.remote.is_some() {
            Ok(AuthStrategy::RemoteBearer(token))
        } else if self.local.is_some() {
            Ok(AuthStrategy::LocalBearer(token))
        } else {
            Err(AuthError::NotConfigured {
                what: "bearer token verification",
            })
        }
    }

    /// Turn a strategy into a principal.
    pub async fn resolve(&self, strategy: AuthStrategy<'_>) -> Result<Principal, AuthError> {
        match strategy {
            AuthStrategy::Anonymous => Ok(Principal::anonymous()),
            AuthStrategy::RemoteBearer(token) => match &self.remote {
                Some(provider) => provider.validate(token).await,
                None => Err(AuthError::Internal("remote strategy without provider".into())),
            },
            AuthStrategy::LocalBearer(token) => match &self.local {
                Some(signer) => {
                    let claims = signer.verify(token)?;
                    Ok(Principal::authenticated(claims.sub, claims.role))
                }
                None => Err(AuthError::Internal("local strategy without secret".into())),
            },
            AuthStrategy::ApiKey(provided) => {
                let expected = self.api_key.as_deref().ok_or(AuthError::NotConfigured {
                    what: "admin API key",
                })?;
                if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
                    Ok(Principal::authenticated("admin", Role::Admin))
                } else {
                    Err(AuthError::InvalidApiKey)
                }
            }
        }
    }

    /// Select and resolve, applying the `Optional` degradation rule.
    pub async fn authenticate(
        &self,
        policy: AuthPolicy,
        headers: &HeaderMap,
    ) -> Result<Principal, AuthError> {
        let result = match self.select(policy, headers) {
            Ok(strategy) => self.resolve(strategy).await,
            Err(e) => Err(e),
        };

        match result {
            Err(e) if policy == AuthPolicy::Optional && e.is_internal() => {
                warn!(error = %e, "Authentication unavailable, continuing as anonymous");
                Ok(Principal::anonymous())
            }
            other => other,
        }
    }
}

/// Extract the token from `Bearer <token>`. The scheme is case-insensitive.
fn bearer_token(value: &str) -> Result<&str, AuthError> {
    let (scheme, token) = value.trim().split_once(' ').ok_or(AuthError::InvalidToken {
        reason: "expected 'Bearer <token>'".to_string(),
    })?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidToken {
            reason: format!("unsupported authorization scheme '{}'", scheme),
        });
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken {
            reason: "empty bearer token".to_string(),
        });
    }
    Ok(token)
}

// =============================================================================
// Axum Middleware
// =============================================================================

/// Middleware state: the shared resolver plus the route's policy.
#[derive(Debug, Clone)]
pub struct AuthGate {
    pub resolver: Arc<AuthResolver>,
    pub policy: AuthPolicy,
}

impl AuthGate {
    pub fn new(resolver: Arc<AuthResolver>, policy: AuthPolicy) -> Self {
        Self { resolver, policy }
    }
}

/// Axum middleware resolving the caller.
///
/// The principal is attached to the request for handlers and rate limiting,
/// and to the response for audit logging.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, middleware};
///
/// let gate = AuthGate::new(resolver, AuthPolicy::Optional);
/// let app = Router::new()
///     .route("/api/images/resize", post(resize_handler))
///     .route_layer(middleware::from_fn_with_state(gate, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(gate): State<AuthGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let principal = gate
        .resolver
        .authenticate(gate.policy, request.headers())
        .await?;

    debug!(
        principal = %principal.id,
        role = %principal.role,
        "Resolved caller"
    );

    request.extensions_mut().insert(principal.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(principal);
    Ok(response)
}

// =============================================================================
// Tests
// =============================================================================
