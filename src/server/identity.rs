//! Remote identity provider.
//!
//! When configured, bearer tokens are validated by asking an external
//! service who the token belongs to. The provider fails closed: any network
//! error, non-200 status, or response without an identity is reported as an
//! invalid token.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::AuthError;

use super::auth::{Principal, Role};

/// Default request timeout for identity lookups.
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves a bearer token into a principal.
///
/// Implementations must be cheap to share across requests.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validate `token`, returning the authenticated principal.
    async fn validate(&self, token: &str) -> Result<Principal, AuthError>;

    /// Short description used in logs and readiness reports.
    fn describe(&self) -> String;
}

/// Identity provider reached over HTTP.
///
/// Sends `GET <url>` with `Authorization: Bearer <token>` and, when set, an
/// `apikey` header. Expects `200` and a JSON body with a non-empty `id`.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    url: Url,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    id: Option<String>,
    role: Option<String>,
    #[serde(default)]
    app_metadata: Option<AppMetadata>,
}

#[derive(Debug, Deserialize)]
struct AppMetadata {
    role: Option<String>,
}

impl HttpIdentityProvider {
    pub fn new(url: Url, api_key: Option<String>, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("failed to build identity client: {}", e))?;

        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let mut request = self.client.get(self.url.clone()).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, provider = %self.url, "Identity provider unreachable");
            AuthError::InvalidToken {
                reason: "identity provider unreachable".to_string(),
            }
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            debug!(status = status.as_u16(), "Identity provider rejected token");
            return Err(AuthError::InvalidToken {
                reason: format!("identity provider returned {}", status.as_u16()),
            });
        }

        let body: IdentityResponse = response.json().await.map_err(|_| AuthError::InvalidToken {
            reason: "identity provider returned an unreadable body".to_string(),
        })?;

        principal_from_response(body)
    }

    fn describe(&self) -> String {
        format!("http {}", self.url)
    }
}

fn principal_from_response(body: IdentityResponse) -> Result<Principal, AuthError> {
    let id = body
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AuthError::InvalidToken {
            reason: "identity provider returned no identity".to_string(),
        })?;

    let role = body
        .app_metadata
        .and_then(|meta| meta.role)
        .or(body.role)
        .map(|role| match role.as_str() {
            "admin" | "service_role" => Role::Admin,
            _ => Role::User,
        })
        .unwrap_or(Role::User);

    Ok(Principal::authenticated(id, role))
}
