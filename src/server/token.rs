//! Locally signed bearer tokens.
//!
//! Tokens are compact HS256 JWS strings:
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(HMAC-SHA256(secret, header.claims))
//! ```
//!
//! with claims `{sub, role, iat, exp}`.
//!
//! # Security Properties
//!
//! - **Constant-time comparison**: signatures are compared with `subtle`
//! - **Signature before expiry**: a forged token is rejected as invalid even
//!   when its claimed expiry is in the past, so expiry is never reported for
//!   a token the server did not sign
//! - **Algorithm pinning**: only `HS256` headers are accepted
//!
//! # Example
//!
//! ```rust
//! use imagesmith::server::token::TokenSigner;
//! use imagesmith::server::auth::Role;
//! use std::time::Duration;
//!
//! let signer = TokenSigner::new("my-secret-key");
//! let (token, _expires_at) = signer.issue("alice", Role::User, Duration::from_secs(3600));
//!
//! let claims = signer.verify(&token).unwrap();
//! assert_eq!(claims.sub, "alice");
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

use super::auth::Role;

/// HMAC-SHA256 type alias
type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of issued tokens (one hour).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claims carried by a local token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (principal id)
    pub sub: String,

    pub role: Role,

    /// Issued at, Unix seconds
    pub iat: u64,

    /// Expires at, Unix seconds
    pub exp: u64,
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Issues and verifies HS256 bearer tokens with one shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Issue a token valid for `ttl` from now.
    ///
    /// Returns the token and its expiry timestamp.
    pub fn issue(&self, subject: &str, role: Role, ttl: Duration) -> (String, u64) {
        let iat = unix_now();
        let exp = iat.saturating_add(ttl.as_secs());
        (self.issue_at(subject, role, iat, exp), exp)
    }

    /// Issue a token with explicit timestamps.
    pub fn issue_at(&self, subject: &str, role: Role, iat: u64, exp: u64) -> String {
        let claims = TokenClaims {
            sub: subject.to_string(),
            role,
            iat,
            exp,
        };
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };

        // Serializing these plain structs cannot fail
        let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap_or_default());
        let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let signing_input = format!("{}.{}", header, claims);
        let signature = URL_SAFE_NO_PAD.encode(self.compute_signature(&signing_input));

        format!("{}.{}", signing_input, signature)
    }

    /// Verify a token against the current time.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify_at(token, unix_now())
    }

    /// Verify a token against `now` (Unix seconds).
    pub fn verify_at(&self, token: &str, now: u64) -> Result<TokenClaims, AuthError> {
        let mut parts = token.split('.');
        let (Some(header), Some(claims), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("token must have three segments"));
        };

        let header: Header = decode_segment(header, "header")?;
        if header.alg != "HS256" {
            return Err(invalid("unsupported signing algorithm"));
        }

        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| invalid("signature is not base64url"))?;

        // Signature check comes before anything in the claims is trusted
        let signing_input = &token[..token.len() - signature.len() - 1];
        let expected = self.compute_signature(signing_input);
        if !bool::from(provided.ct_eq(&expected)) {
            return Err(invalid("signature mismatch"));
        }

        let claims: TokenClaims = decode_segment(claims, "claims")?;
        if now >= claims.exp {
            return Err(AuthError::TokenExpired {
                expired_at: claims.exp,
                current_time: now,
            });
        }

        Ok(claims)
    }

    fn compute_signature(&self, signing_input: &str) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn invalid(reason: &str) -> AuthError {
    AuthError::InvalidToken {
        reason: reason.to_string(),
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| invalid(&format!("{} is not base64url", what)))?;
    serde_json::from_slice(&bytes).map_err(|_| invalid(&format!("{} is not valid JSON", what)))
}

// =============================================================================
// Tests
// =============================================================================
