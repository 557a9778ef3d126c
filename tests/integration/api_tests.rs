//! API integration tests for the five operations and the common surface.
//!
//! Tests verify:
//! - Each operation end to end through the real router
//! - Parameter validation happens before decoding
//! - Error envelope, security headers and fallback
//! - CORS origin handling

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;

use super::test_utils::{
    body_bytes, body_json, dimensions_of, jpeg_fixture, png_fixture, rgba_png_fixture,
    router_with, test_config, test_resolver, test_router, MultipartBuilder,
};

// =============================================================================
// Resize
// =============================================================================

#[tokio::test]
async fn test_resize_png_to_width() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(200, 150))
        .text("width", "100")
        .text("format", "png")
        .request("/api/images/resize");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    assert!(response.headers().contains_key("cache-control"));
    let length: usize = response
        .headers()
        .get("content-length")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let body = body_bytes(response).await;
    assert_eq!(body.len(), length);
    // Height follows the source aspect ratio.
    assert_eq!(dimensions_of(&body), (100, 75));
}

#[tokio::test]
async fn test_resize_defaults_to_jpeg() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(64, 64))
        .text("height", "32")
        .request("/api/images/resize");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
    let body = body_bytes(response).await;
    assert_eq!(dimensions_of(&body), (32, 32));
}

#[tokio::test]
async fn test_resize_both_dimensions_fills_box() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(300, 100))
        .text("width", "50")
        .text("height", "50")
        .text("format", "png")
        .request("/api/images/resize");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(dimensions_of(&body_bytes(response).await), (50, 50));
}

#[tokio::test]
async fn test_resize_without_dimensions() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(10, 10))
        .request("/api/images/resize");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_DIMENSIONS");
}

#[tokio::test]
async fn test_resize_rejects_malformed_width() {
    for width in ["abc", "-5", "0", "NaN", "1.5"] {
        let request = MultipartBuilder::new()
            .png(&png_fixture(10, 10))
            .text("width", width)
            .request("/api/images/resize");

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "width {:?} should be rejected",
            width
        );
        let json = body_json(response).await;
        assert_eq!(json["code"], "INVALID_DIMENSIONS");
    }
}

// =============================================================================
// Compress
// =============================================================================

#[tokio::test]
async fn test_compress_reports_sizes() {
    let original = jpeg_fixture(256, 256);
    let request = MultipartBuilder::new()
        .jpeg(&original)
        .text("quality", "40")
        .request("/api/images/compress");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .unwrap_or_else(|| panic!("missing {}", name))
            .to_str()
            .unwrap()
            .to_string()
    };
    let original_size: usize = header("x-original-size").parse().unwrap();
    let compressed_size: usize = header("x-compressed-size").parse().unwrap();
    let ratio = header("x-compression-ratio");

    assert_eq!(original_size, original.len());
    assert!(compressed_size < original_size);
    assert!(ratio.contains('.'));

    let body = body_bytes(response).await;
    assert_eq!(body.len(), compressed_size);
}

#[tokio::test]
async fn test_compress_accepts_full_quality_range() {
    let original = jpeg_fixture(32, 32);
    for quality in ["1", "50", "100"] {
        let request = MultipartBuilder::new()
            .jpeg(&original)
            .text("quality", quality)
            .request("/api/images/compress");

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "quality {}", quality);
    }
}

#[tokio::test]
async fn test_compress_rejects_out_of_range_quality() {
    let request = MultipartBuilder::new()
        .jpeg(&jpeg_fixture(16, 16))
        .text("quality", "101")
        .request("/api/images/compress");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_PARAMETER");
}

// =============================================================================
// Watermark
// =============================================================================

#[tokio::test]
async fn test_watermark_keeps_format_and_size() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(120, 80))
        .text("text", "SAMPLE")
        .text("position", "top-left")
        .text("fontSize", "14")
        .text("color", "#ff0000")
        .request("/api/images/watermark");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(dimensions_of(&body_bytes(response).await), (120, 80));
}

#[tokio::test]
async fn test_watermark_with_alpha_source() {
    let request = MultipartBuilder::new()
        .png(&rgba_png_fixture(64, 64))
        .text("text", "hi")
        .request("/api/images/watermark");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let img = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert!(img.color().has_alpha());
}

#[tokio::test]
async fn test_watermark_accepts_non_ascii_text() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(200, 80))
        .text("text", "© Jane Doe, Zürich")
        .text("position", "bottom-left")
        .text("fontSize", "17")
        .request("/api/images/watermark");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    assert_eq!(dimensions_of(&bytes), (200, 80));
    assert_ne!(bytes, png_fixture(200, 80));
}

#[tokio::test]
async fn test_watermark_requires_text() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(20, 20))
        .request("/api/images/watermark");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "MISSING_PARAMETER");

    let request = MultipartBuilder::new()
        .png(&png_fixture(20, 20))
        .text("text", "")
        .request("/api/images/watermark");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_PARAMETER");
}

#[tokio::test]
async fn test_watermark_rejects_bad_opacity() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(20, 20))
        .text("text", "x")
        .text("opacity", "1.5")
        .request("/api/images/watermark");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_PARAMETER");
}

// =============================================================================
// Convert
// =============================================================================

#[tokio::test]
async fn test_convert_png_to_webp_and_back() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(40, 30))
        .text("format", "webp")
        .request("/api/images/convert");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/webp");
    let webp = body_bytes(response).await;

    let request = MultipartBuilder::new()
        .file("image", "upload.webp", "image/webp", &webp)
        .text("format", "png")
        .request("/api/images/convert");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(dimensions_of(&body_bytes(response).await), (40, 30));
}

async fn convert_to_avif(width: u32, height: u32) -> Vec<u8> {
    let request = MultipartBuilder::new()
        .png(&png_fixture(width, height))
        .text("format", "avif")
        .request("/api/images/convert");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/avif");
    body_bytes(response).await
}

#[tokio::test]
async fn test_avif_upload_is_inspectable() {
    let avif = convert_to_avif(48, 20).await;

    let request = MultipartBuilder::new()
        .file("image", "upload.avif", "image/avif", &avif)
        .request("/api/images/metadata");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["format"], "avif");
    assert_eq!(json["width"], 48);
    assert_eq!(json["height"], 20);
    assert_eq!(json["size"], avif.len());
}

#[cfg(feature = "avif-decode")]
#[tokio::test]
async fn test_convert_png_to_avif_and_back() {
    let avif = convert_to_avif(48, 20).await;

    let request = MultipartBuilder::new()
        .file("image", "upload.avif", "image/avif", &avif)
        .text("format", "png")
        .request("/api/images/convert");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(dimensions_of(&body_bytes(response).await), (48, 20));
}

#[tokio::test]
async fn test_convert_bogus_format_is_rejected_before_decode() {
    // The upload is not an image at all; a decode attempt would fail with
    // a different code.
    let request = MultipartBuilder::new()
        .png(b"not really a png")
        .text("format", "bogus")
        .request("/api/images/convert");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNSUPPORTED_FORMAT");
    assert_eq!(json["error"], "Unsupported format");
}

#[tokio::test]
async fn test_convert_requires_format() {
    let request = MultipartBuilder::new()
        .png(&png_fixture(8, 8))
        .request("/api/images/convert");

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "MISSING_PARAMETER");
}

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_metadata_describes_png() {
    let bytes = rgba_png_fixture(33, 21);
    let request = MultipartBuilder::new()
        .png(&bytes)
        .request("/api/images/metadata");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let json = body_json(response).await;
    assert_eq!(json["width"], 33);
    assert_eq!(json["height"], 21);
    assert_eq!(json["format"], "png");
    assert_eq!(json["size"], bytes.len());
    assert_eq!(json["channels"], 4);
    assert_eq!(json["hasAlpha"], true);
    assert_eq!(json["colorspace"], "srgb");
    assert_eq!(json["hasProfile"], false);
    assert!(json["density"].is_number());
}

#[tokio::test]
async fn test_metadata_is_idempotent() {
    let bytes = jpeg_fixture(24, 24);
    let mut bodies = Vec::new();
    for _ in 0..2 {
        let request = MultipartBuilder::new()
            .jpeg(&bytes)
            .request("/api/images/metadata");
        let response = test_router().oneshot(request).await.unwrap();
        bodies.push(body_json(response).await);
    }
    assert_eq!(bodies[0], bodies[1]);
}

#[tokio::test]
async fn test_corrupt_image_data() {
    let mut truncated = png_fixture(50, 50);
    truncated.truncate(60);

    let request = MultipartBuilder::new()
        .png(&truncated)
        .text("width", "10")
        .request("/api/images/resize");

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_IMAGE_DATA");
}

// =============================================================================
// Common Surface
// =============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "imagesmith");
    assert!(json["uptimeSeconds"].is_number());
}

#[tokio::test]
async fn test_unknown_route_uses_envelope() {
    let request = Request::builder()
        .uri("/api/images/rotate")
        .body(Body::empty())
        .unwrap();

    let response = test_router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert!(json["details"].as_str().unwrap().contains("/api/images/rotate"));
}

#[tokio::test]
async fn test_security_headers_present() {
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = test_router().oneshot(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
    assert!(headers.contains_key("content-security-policy"));
    assert!(!headers.contains_key("strict-transport-security"));
}

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/images/resize")
        .header("origin", origin)
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_cors_preflight_skips_auth() {
    let router = router_with(
        test_resolver(),
        test_config()
            .with_require_auth(true)
            .with_cors_origins(vec!["https://app.example.com".to_string()]),
    );

    let response = router.oneshot(preflight("https://app.example.com")).await.unwrap();

    assert!(response.status().is_success());
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "https://app.example.com"
    );
}

#[tokio::test]
async fn test_cors_refuses_origins_by_default() {
    let response = test_router()
        .oneshot(preflight("https://evil.example"))
        .await
        .unwrap();
    assert!(!response
        .headers()
        .contains_key("access-control-allow-origin"));

    let request = Request::builder()
        .uri("/health")
        .header("origin", "https://evil.example")
        .body(Body::empty())
        .unwrap();
    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response
        .headers()
        .contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_cors_refuses_unlisted_origin() {
    let router = router_with(
        test_resolver(),
        test_config().with_cors_origins(vec!["https://app.example.com".to_string()]),
    );

    let response = router.oneshot(preflight("https://evil.example")).await.unwrap();
    assert!(!response
        .headers()
        .contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_cors_any_origin_when_asked() {
    let router = router_with(test_resolver(), test_config().with_cors_any_origin());

    let response = router.oneshot(preflight("https://anywhere.example")).await.unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_error_trace_follows_router_setting() {
    let missing = || {
        Request::builder()
            .uri("/api/images/rotate")
            .body(Body::empty())
            .unwrap()
    };

    let traced = router_with(test_resolver(), test_config().with_error_traces(true));
    let json = body_json(traced.oneshot(missing()).await.unwrap()).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert!(json["trace"].as_str().unwrap().contains("NotFound"));

    let quiet = router_with(test_resolver(), test_config().with_error_traces(false));
    let json = body_json(quiet.oneshot(missing()).await.unwrap()).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert!(json.get("trace").is_none());
}

#[tokio::test]
async fn test_get_on_image_route_is_not_allowed() {
    let request = Request::builder()
        .uri("/api/images/resize")
        .body(Body::empty())
        .unwrap();

    let response = test_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
