//! Test utilities for integration tests.
//!
//! This module provides a multipart body builder, image fixtures, a mock
//! identity provider and helpers for building routers and reading responses.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

use imagesmith::error::AuthError;
use imagesmith::server::IdentityProvider;
use imagesmith::{
    create_router, AuthResolver, Principal, Role, RouterConfig, TokenSigner, TransformEngine,
};

pub const TEST_SECRET: &str = "integration-test-secret";
pub const TEST_API_KEY: &str = "integration-admin-key";

// =============================================================================
// Image Fixtures
// =============================================================================

/// A smooth gradient, encoded as PNG.
pub fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 96])
    });
    encode(DynamicImage::ImageRgb8(img), image::ImageFormat::Png)
}

/// A semi-transparent PNG.
pub fn rgba_png_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| Rgba([200, 40, 40, (x % 256) as u8]));
    encode(DynamicImage::ImageRgba8(img), image::ImageFormat::Png)
}

/// A noisy, photo-like JPEG at high quality, so recompression shrinks it.
pub fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
    let mut seed: u32 = 0x2545_f491;
    let img = RgbImage::from_fn(width, height, |x, y| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let noise = (seed % 48) as u8;
        Rgb([
            ((x * 3) % 200) as u8 + noise,
            ((y * 2) % 200) as u8 + noise,
            (((x + y) * 5) % 200) as u8 + noise,
        ])
    });

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 95)
        .encode_image(&img)
        .unwrap();
    out
}

fn encode(img: DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), format).unwrap();
    out
}

/// Decode a response body and return its dimensions.
pub fn dimensions_of(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).expect("response should decode");
    (img.width(), img.height())
}

// =============================================================================
// Multipart Builder
// =============================================================================

/// Builds `multipart/form-data` bodies by hand.
pub struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self {
            boundary: "imagesmith-test-boundary-7d1f".to_string(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, filename
            )
            .as_bytes(),
        );
        self.body
            .extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Shorthand for the `image` field with a PNG content type.
    pub fn png(self, bytes: &[u8]) -> Self {
        self.file("image", "upload.png", "image/png", bytes)
    }

    pub fn jpeg(self, bytes: &[u8]) -> Self {
        self.file("image", "upload.jpg", "image/jpeg", bytes)
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn build(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (self.content_type(), self.body)
    }

    /// A POST to `uri` carrying this form.
    pub fn request(self, uri: &str) -> Request<Body> {
        self.request_with(uri, |b| b)
    }

    /// Like [`request`](Self::request), with extra builder customisation.
    pub fn request_with(
        self,
        uri: &str,
        customize: impl FnOnce(axum::http::request::Builder) -> axum::http::request::Builder,
    ) -> Request<Body> {
        let (content_type, body) = self.build();
        customize(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, content_type),
        )
        .body(Body::from(body))
        .unwrap()
    }
}

// =============================================================================
// Mock Identity Provider
// =============================================================================

/// Accepts a fixed set of tokens and counts calls.
#[derive(Default)]
pub struct MockIdentityProvider {
    principals: HashMap<String, Principal>,
    unreachable: bool,
    calls: AtomicUsize,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: &str, id: &str, role: Role) -> Self {
        self.principals
            .insert(token.to_string(), Principal::authenticated(id, role));
        self
    }

    /// Simulate a provider that cannot be reached.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(AuthError::InvalidToken {
                reason: "identity provider unreachable".to_string(),
            });
        }
        self.principals
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken {
                reason: "unknown token".to_string(),
            })
    }

    fn describe(&self) -> String {
        "mock identity provider".to_string()
    }
}

// =============================================================================
// Routers and Responses
// =============================================================================

/// Resolver with a local token secret and the admin key.
pub fn test_resolver() -> AuthResolver {
    AuthResolver::new()
        .with_token_signer(TokenSigner::new(TEST_SECRET))
        .with_api_key(TEST_API_KEY)
}

pub fn test_config() -> RouterConfig {
    RouterConfig::new().with_tracing(false).with_workers(2)
}

/// Router with local auth, optional on image routes.
pub fn test_router() -> Router {
    create_router(TransformEngine::default(), test_resolver(), test_config())
}

pub fn router_with(auth: AuthResolver, config: RouterConfig) -> Router {
    create_router(TransformEngine::default(), auth, config)
}

/// A token signed with [`TEST_SECRET`].
pub fn user_token(subject: &str) -> String {
    TokenSigner::new(TEST_SECRET)
        .issue(subject, Role::User, std::time::Duration::from_secs(300))
        .0
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("response should be JSON")
}

/// Shared provider handle for tests that inspect call counts.
pub fn shared(provider: MockIdentityProvider) -> Arc<MockIdentityProvider> {
    Arc::new(provider)
}
