//! Authentication integration tests.
//!
//! Tests verify:
//! - Optional and required policies on image routes
//! - Local bearer tokens (valid, expired, forged)
//! - Remote identity provider precedence and fail-closed behavior
//! - API-key protected admin routes, readiness and token issuance

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use imagesmith::server::token::unix_now;
use imagesmith::{AuthResolver, Role, TokenSigner};

use super::test_utils::{
    body_json, png_fixture, router_with, shared, test_config, test_resolver, test_router,
    user_token, MockIdentityProvider, MultipartBuilder, TEST_API_KEY, TEST_SECRET,
};

fn resize_request(authorization: Option<&str>) -> Request<Body> {
    MultipartBuilder::new()
        .png(&png_fixture(20, 20))
        .text("width", "10")
        .request_with("/api/images/resize", |builder| match authorization {
            Some(value) => builder.header("authorization", value),
            None => builder,
        })
}

fn required_router() -> axum::Router {
    router_with(test_resolver(), test_config().with_require_auth(true))
}

// =============================================================================
// Image Routes
// =============================================================================

#[tokio::test]
async fn test_optional_allows_anonymous() {
    let response = test_router().oneshot(resize_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_required_rejects_anonymous() {
    let response = required_router()
        .oneshot(resize_request(None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "AUTHENTICATION_REQUIRED");
}

#[tokio::test]
async fn test_required_accepts_local_token() {
    let token = user_token("alice");
    let response = required_router()
        .oneshot(resize_request(Some(&format!("Bearer {}", token))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_expired_token_is_401_not_500() {
    let now = unix_now();
    let token = TokenSigner::new(TEST_SECRET).issue_at("alice", Role::User, now - 7200, now - 3600);

    for router in [test_router(), required_router()] {
        let response = router
            .oneshot(resize_request(Some(&format!("Bearer {}", token))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "TOKEN_EXPIRED");
    }
}

#[tokio::test]
async fn test_forged_token_is_invalid() {
    let token = TokenSigner::new("some-other-secret")
        .issue("mallory", Role::Admin, Duration::from_secs(60))
        .0;

    let response = test_router()
        .oneshot(resize_request(Some(&format!("Bearer {}", token))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_forged_expired_token_is_invalid_not_expired() {
    let now = unix_now();
    let token =
        TokenSigner::new("some-other-secret").issue_at("mallory", Role::User, now - 20, now - 10);

    let response = test_router()
        .oneshot(resize_request(Some(&format!("Bearer {}", token))))
        .await
        .unwrap();

    assert_eq!(body_json(response).await["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_non_bearer_scheme_is_invalid() {
    let response = test_router()
        .oneshot(resize_request(Some("Basic YWxpY2U6c2VjcmV0")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_bearer_without_verifier_on_required_route() {
    let auth = AuthResolver::new().with_api_key(TEST_API_KEY);
    let router = router_with(auth, test_config().with_require_auth(true));

    let response = router
        .oneshot(resize_request(Some("Bearer anything")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["code"], "AUTH_NOT_CONFIGURED");
}

#[tokio::test]
async fn test_bearer_without_verifier_on_optional_route_degrades() {
    let router = router_with(AuthResolver::new(), test_config());

    let response = router
        .oneshot(resize_request(Some("Bearer anything")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Remote Identity Provider
// =============================================================================

#[tokio::test]
async fn test_remote_provider_validates_tokens() {
    let provider = shared(MockIdentityProvider::new().with_user("remote-token", "bob", Role::User));
    let auth = test_resolver().with_identity_provider(provider.clone());
    let router = router_with(auth, test_config().with_require_auth(true));

    let response = router
        .oneshot(resize_request(Some("Bearer remote-token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_remote_provider_takes_precedence_over_local() {
    // A locally valid token is still sent to the remote provider, which
    // does not know it.
    let provider = shared(MockIdentityProvider::new());
    let auth = test_resolver().with_identity_provider(provider.clone());
    let router = router_with(auth, test_config());

    let response = router
        .oneshot(resize_request(Some(&format!("Bearer {}", user_token("alice")))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_TOKEN");
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_unreachable_provider_fails_closed() {
    let provider = shared(MockIdentityProvider::unreachable());
    let auth = test_resolver().with_identity_provider(provider);
    let router = router_with(auth, test_config());

    let response = router
        .oneshot(resize_request(Some("Bearer whatever")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_TOKEN");
}

// =============================================================================
// Admin Routes
// =============================================================================

fn admin_get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn token_request(key: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/admin/tokens")
        .header("x-api-key", key)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_admin_requires_api_key() {
    let response = test_router()
        .oneshot(admin_get("/api/admin/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "MISSING_API_KEY");

    let response = test_router()
        .oneshot(admin_get("/api/admin/health", Some("wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_API_KEY");
}

#[tokio::test]
async fn test_admin_without_configured_key() {
    let auth = AuthResolver::new().with_token_signer(TokenSigner::new(TEST_SECRET));
    let router = router_with(auth, test_config());

    let response = router
        .oneshot(admin_get("/api/admin/health", Some("anything")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["code"], "AUTH_NOT_CONFIGURED");
}

#[tokio::test]
async fn test_readiness_report() {
    let response = test_router()
        .oneshot(admin_get("/api/admin/health", Some(TEST_API_KEY)))
        .await
        .unwrap();

    // No remote provider configured, so the report is degraded but serving.
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    let checks = json["checks"].as_array().unwrap();
    assert!(checks
        .iter()
        .any(|c| c["name"] == "codec" && c["outcome"] == "pass"));
}

#[tokio::test]
async fn test_readiness_unhealthy_without_verifier() {
    let router = router_with(AuthResolver::new().with_api_key(TEST_API_KEY), test_config());

    let response = router
        .oneshot(admin_get("/api/admin/health", Some(TEST_API_KEY)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn test_issue_token_round_trip() {
    let response = test_router()
        .oneshot(token_request(
            TEST_API_KEY,
            r#"{"subject": "carol", "role": "admin", "ttlSeconds": 120}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["tokenType"], "Bearer");
    assert!(json["expiresAt"].is_string());

    let token = json["token"].as_str().unwrap();
    let claims = TokenSigner::new(TEST_SECRET).verify(token).unwrap();
    assert_eq!(claims.sub, "carol");
    assert_eq!(claims.role, Role::Admin);
    assert_eq!(claims.exp - claims.iat, 120);

    // The issued token opens a required route.
    let response = required_router()
        .oneshot(resize_request(Some(&format!("Bearer {}", token))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_issue_token_malformed_json() {
    let response = test_router()
        .oneshot(token_request(TEST_API_KEY, r#"{"subject": "#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_JSON");
}

#[tokio::test]
async fn test_issue_token_validation() {
    let cases = [
        (r#"{"subject": "  "}"#, "MISSING_PARAMETER"),
        (r#"{"subject": "dave", "role": "root"}"#, "INVALID_PARAMETER"),
        (r#"{"subject": "dave", "role": "anonymous"}"#, "INVALID_PARAMETER"),
        (r#"{"subject": "dave", "ttlSeconds": 0}"#, "INVALID_PARAMETER"),
    ];

    for (body, code) in cases {
        let response = test_router()
            .oneshot(token_request(TEST_API_KEY, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(body_json(response).await["code"], code, "{}", body);
    }
}

#[tokio::test]
async fn test_issue_token_body_limit() {
    let router = router_with(test_resolver(), test_config().with_json_body_limit(64));
    let body = format!(r#"{{"subject": "{}"}}"#, "x".repeat(200));

    let response = router
        .oneshot(token_request(TEST_API_KEY, &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["code"], "PAYLOAD_TOO_LARGE");
}
