//! Rate limiting integration tests.
//!
//! A manual clock drives the fixed window so the tests never sleep.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use imagesmith::server::{Clock, ManualClock};
use imagesmith::{RateLimitConfig, RateLimiter};

use super::test_utils::{
    body_json, png_fixture, router_with, test_config, test_resolver, user_token, MultipartBuilder,
    TEST_API_KEY,
};

const WINDOW: Duration = Duration::from_secs(60);

fn limited_router(capacity: u64, clock: Arc<ManualClock>, trust_forwarded: bool) -> Router {
    let limiter = RateLimiter::with_clock(
        RateLimitConfig {
            capacity,
            window: WINDOW,
        },
        clock as Arc<dyn Clock>,
    );
    router_with(
        test_resolver(),
        test_config()
            .with_rate_limiter(Arc::new(limiter))
            .with_trust_forwarded(trust_forwarded),
    )
}

fn metadata_request(headers: &[(&str, String)]) -> Request<Body> {
    let headers = headers.to_vec();
    MultipartBuilder::new()
        .png(&png_fixture(8, 8))
        .request_with("/api/images/metadata", move |mut builder| {
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
            builder
        })
}

#[tokio::test]
async fn test_allowed_responses_carry_limit_headers() {
    let router = limited_router(3, Arc::new(ManualClock::new()), false);

    let response = router.oneshot(metadata_request(&[])).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "3");
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "2");
}

#[tokio::test]
async fn test_exceeding_capacity_returns_429() {
    let clock = Arc::new(ManualClock::new());
    let router = limited_router(2, clock.clone(), false);

    for _ in 0..2 {
        let response = router.clone().oneshot(metadata_request(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    clock.advance(Duration::from_secs(15));
    let response = router.clone().oneshot(metadata_request(&[])).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_header: u64 = response
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["code"], "RATE_LIMIT_EXCEEDED");
    let retry_after = json["retryAfter"].as_u64().unwrap();
    assert_eq!(retry_after, retry_header);
    assert!((1..=WINDOW.as_secs()).contains(&retry_after));
    assert_eq!(retry_after, 45);
}

#[tokio::test]
async fn test_window_resets() {
    let clock = Arc::new(ManualClock::new());
    let router = limited_router(1, clock.clone(), false);

    assert_eq!(
        router.clone().oneshot(metadata_request(&[])).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        router.clone().oneshot(metadata_request(&[])).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    clock.advance(WINDOW);

    assert_eq!(
        router.oneshot(metadata_request(&[])).await.unwrap().status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_authenticated_callers_have_separate_buckets() {
    let router = limited_router(1, Arc::new(ManualClock::new()), false);
    let alice = vec![("authorization", format!("Bearer {}", user_token("alice")))];
    let bob = vec![("authorization", format!("Bearer {}", user_token("bob")))];

    let first = router.clone().oneshot(metadata_request(&alice)).await.unwrap();
    let second = router.clone().oneshot(metadata_request(&bob)).await.unwrap();
    let third = router.oneshot(metadata_request(&alice)).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_forwarded_for_keys_anonymous_callers_when_trusted() {
    let router = limited_router(1, Arc::new(ManualClock::new()), true);
    let from = |ip: &str| vec![("x-forwarded-for", format!("{}, 10.0.0.1", ip))];

    let a = router.clone().oneshot(metadata_request(&from("203.0.113.7"))).await.unwrap();
    let b = router.clone().oneshot(metadata_request(&from("198.51.100.2"))).await.unwrap();
    let a_again = router.oneshot(metadata_request(&from("203.0.113.7"))).await.unwrap();

    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    assert_eq!(a_again.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_forwarded_for_ignored_when_untrusted() {
    let router = limited_router(1, Arc::new(ManualClock::new()), false);
    let from = |ip: &str| vec![("x-forwarded-for", ip.to_string())];

    let a = router.clone().oneshot(metadata_request(&from("203.0.113.7"))).await.unwrap();
    let b = router.oneshot(metadata_request(&from("198.51.100.2"))).await.unwrap();

    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let router = limited_router(1, Arc::new(ManualClock::new()), false);

    for _ in 0..3 {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}

fn admin_health(api_key: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/admin/health")
        .header("x-api-key", api_key)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_wrong_api_keys_are_rate_limited() {
    let router = limited_router(3, Arc::new(ManualClock::new()), false);

    let mut statuses = Vec::new();
    for attempt in 0..10 {
        let key = format!("guess-{}", attempt);
        let response = router.clone().oneshot(admin_health(&key)).await.unwrap();
        statuses.push(response.status());
    }

    assert_eq!(&statuses[..3], &[StatusCode::UNAUTHORIZED; 3]);
    assert!(statuses[3..]
        .iter()
        .all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
}

#[tokio::test]
async fn test_rejected_tokens_are_rate_limited() {
    let router = limited_router(2, Arc::new(ManualClock::new()), false);
    let forged = vec![("authorization", "Bearer not.a.token".to_string())];

    let first = router.clone().oneshot(metadata_request(&forged)).await.unwrap();
    let second = router.clone().oneshot(metadata_request(&forged)).await.unwrap();
    let third = router.oneshot(metadata_request(&forged)).await.unwrap();

    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(first.headers().get("x-ratelimit-remaining").unwrap(), "1");
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_admin_routes_are_rate_limited_per_caller() {
    let router = limited_router(2, Arc::new(ManualClock::new()), false);

    for _ in 0..2 {
        let response = router.clone().oneshot(admin_health(TEST_API_KEY)).await.unwrap();
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
    }

    let response = router.oneshot(admin_health(TEST_API_KEY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_valid_credentials_do_not_drain_the_client_budget() {
    // One client address, many users: only the per-user buckets fill up
    let router = limited_router(1, Arc::new(ManualClock::new()), false);

    for user in ["u1", "u2", "u3", "u4"] {
        let auth = vec![("authorization", format!("Bearer {}", user_token(user)))];
        let response = router.clone().oneshot(metadata_request(&auth)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", user);
    }
}
