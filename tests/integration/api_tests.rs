//! API integration tests for image rendering and error handling.
//!
//! Tests verify:
//! - Image rendering with presets, overrides and the auto window
//! - Cache miss/hit behavior observed through headers and stats
//! - Thumbnails, metadata, presets and health endpoints
//! - Error cases (missing image, undecodable object, bad parameters)

use axum::http::StatusCode;

use super::test_utils::{
    decode_data_url, default_app, get, is_valid_png, json_body, send, DicomBuilder,
    MockImageSource,
};

// =============================================================================
// Image Rendering
// =============================================================================

#[tokio::test]
async fn test_image_preset_miss_then_hit() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(32, 32).build());
    let reads = source.reads();
    let router = default_app(source);

    // First request renders
    let response = send(&router, get("/images/ct-1?preset=lung")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cache-hit").unwrap(), "false");
    let first = json_body(response).await;
    assert_eq!(first["cached"], false);
    assert_eq!(first["window"], 1500.0);
    assert_eq!(first["level"], -600.0);
    assert_eq!(first["preset"], "lung");
    assert_eq!(first["window_source"], "preset");
    assert_eq!(first["format"], "base64_png");
    assert_eq!(first["width"], 32);
    assert_eq!(first["height"], 32);

    // Pixels and metadata came from a single read
    assert_eq!(reads.total(), 1);

    // Second request is served from cache
    let response = send(&router, get("/images/ct-1?preset=lung")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cache-hit").unwrap(), "true");
    let second = json_body(response).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["image_data_url"], first["image_data_url"]);
    assert_eq!(second["metadata"], first["metadata"]);

    // Neither the image nor its metadata was read again
    assert_eq!(reads.total(), 1);

    // Only image lookups are counted
    let stats = json_body(send(&router, get("/stats")).await).await;
    assert_eq!(stats["images_rendered"], 1);
    assert_eq!(stats["cache_misses"], 1);
    assert_eq!(stats["cache_hits"], 1);
}

#[tokio::test]
async fn test_image_is_valid_png() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(16, 24).build());
    let router = default_app(source);

    let body = json_body(send(&router, get("/images/ct-1")).await).await;
    let url = body["image_data_url"].as_str().unwrap();
    let png = decode_data_url(url);
    assert!(is_valid_png(&png));

    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!(decoded.width(), 24);
    assert_eq!(decoded.height(), 16);
}

#[tokio::test]
async fn test_image_level_overrides_preset() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(8, 8).build());
    let router = default_app(source);

    let response = send(&router, get("/images/ct-1?preset=lung&level=-500")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["window"], 1500.0);
    assert_eq!(body["level"], -500.0);
    assert_eq!(body["preset"], "lung");
}

#[tokio::test]
async fn test_image_explicit_window_is_manual() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(8, 8).build());
    let router = default_app(source);

    let body = json_body(send(&router, get("/images/ct-1?window=400&level=40")).await).await;
    assert_eq!(body["window"], 400.0);
    assert_eq!(body["level"], 40.0);
    assert_eq!(body["window_source"], "manual");
    assert!(body["preset"].is_null());
}

#[tokio::test]
async fn test_image_auto_window_without_parameters() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(16, 16).build());
    let router = default_app(source);

    let body = json_body(send(&router, get("/images/ct-1")).await).await;
    assert_eq!(body["window_source"], "auto");
    assert!(body["window"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_different_windows_are_cached_separately() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(16, 16).build());
    let router = default_app(source);

    let lung = json_body(send(&router, get("/images/ct-1?preset=lung")).await).await;
    let bone = send(&router, get("/images/ct-1?preset=bone")).await;
    assert_eq!(bone.headers().get("x-cache-hit").unwrap(), "false");

    let bone = json_body(bone).await;
    assert_ne!(lung["image_data_url"], bone["image_data_url"]);
}

#[tokio::test]
async fn test_invert_changes_output() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(16, 16).build());
    let router = default_app(source);

    let normal = json_body(send(&router, get("/images/ct-1?preset=bone")).await).await;
    let inverted =
        json_body(send(&router, get("/images/ct-1?preset=bone&invert=true")).await).await;

    assert_eq!(inverted["invert"], true);
    assert_ne!(normal["image_data_url"], inverted["image_data_url"]);

    let numeric = send(&router, get("/images/ct-1?preset=bone&invert=1")).await;
    assert_eq!(numeric.headers().get("x-cache-hit").unwrap(), "true");
    assert_eq!(
        json_body(numeric).await["image_data_url"],
        inverted["image_data_url"]
    );
}

#[tokio::test]
async fn test_image_metadata_is_embedded() {
    let data = DicomBuilder::new(8, 8)
        .with_patient_id("PAT-001")
        .with_rescale(1.0, -1024.0)
        .build();
    let source = MockImageSource::new().with_image("ct-1", data);
    let router = default_app(source);

    let body = json_body(send(&router, get("/images/ct-1")).await).await;
    assert_eq!(body["metadata"]["patient_id"], "PAT-001");
    assert_eq!(body["metadata"]["modality"], "CT");
    assert_eq!(body["metadata"]["rows"], 8);
    assert_eq!(body["metadata"]["rescale_intercept"], -1024.0);
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_missing_image_returns_404() {
    let router = default_app(MockImageSource::new());

    let response = send(&router, get("/images/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_undecodable_image_returns_422() {
    let source = MockImageSource::new().with_image("junk", b"definitely not DICOM".to_vec());
    let router = default_app(source);

    let response = send(&router, get("/images/junk")).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json_body(response).await;
    assert_eq!(body["error"], "decode_error");
}

#[tokio::test]
async fn test_unknown_preset_is_ignored() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(8, 8).build());
    let router = default_app(source);

    let response = send(&router, get("/images/ct-1?preset=abdomen")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["window_source"], "auto");
    assert!(body["preset"].is_null());

    // Same cache entry as a request without a preset
    let response = send(&router, get("/images/ct-1")).await;
    assert_eq!(response.headers().get("x-cache-hit").unwrap(), "true");
    assert_eq!(
        json_body(response).await["image_data_url"],
        body["image_data_url"]
    );

    // Explicit values still apply
    let body = json_body(
        send(
            &router,
            get("/images/ct-1?preset=abdomen&window=400&level=40"),
        )
        .await,
    )
    .await;
    assert_eq!(body["window"], 400.0);
    assert_eq!(body["level"], 40.0);
    assert_eq!(body["window_source"], "manual");
}

#[tokio::test]
async fn test_invalid_invert_flag_rejected() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(8, 8).build());
    let router = default_app(source);

    let response = send(&router, get("/images/ct-1?invert=maybe")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_preset_means_auto() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(8, 8).build());
    let router = default_app(source);

    let response = send(&router, get("/images/ct-1?preset=")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["window_source"], "auto");
}

#[tokio::test]
async fn test_non_numeric_window_rejected() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(8, 8).build());
    let router = default_app(source);

    let response = send(&router, get("/images/ct-1?window=wide")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Thumbnails
// =============================================================================

#[tokio::test]
async fn test_thumbnail_fits_within_size() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(64, 32).build());
    let router = default_app(source);

    let response = send(&router, get("/images/ct-1/thumbnail?size=16")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-cache-hit").unwrap(), "false");

    let body = json_body(response).await;
    assert_eq!(body["size"], 16);
    assert_eq!(body["height"], 16);
    assert_eq!(body["width"], 8);

    let png = decode_data_url(body["thumbnail_url"].as_str().unwrap());
    assert!(is_valid_png(&png));

    let response = send(&router, get("/images/ct-1/thumbnail?size=16")).await;
    assert_eq!(response.headers().get("x-cache-hit").unwrap(), "true");
}

#[tokio::test]
async fn test_thumbnail_invalid_size() {
    let source = MockImageSource::new().with_image("ct-1", DicomBuilder::new(8, 8).build());
    let router = default_app(source);

    for uri in [
        "/images/ct-1/thumbnail?size=0",
        "/images/ct-1/thumbnail?size=4096",
    ] {
        let response = send(&router, get(uri)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(json_body(response).await["error"], "invalid_size");
    }
}

// =============================================================================
// Metadata, Presets, Health
// =============================================================================

#[tokio::test]
async fn test_metadata_endpoint() {
    let data = DicomBuilder::new(12, 10)
        .with_window(400.0, 40.0)
        .with_instance_number(7)
        .build();
    let source = MockImageSource::new().with_image("ct-1", data);
    let router = default_app(source);

    let response = send(&router, get("/images/ct-1/metadata")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["rows"], 12);
    assert_eq!(body["columns"], 10);
    assert_eq!(body["instance_number"], 7);
    assert_eq!(body["window_width"], 400.0);
    assert_eq!(body["window_center"], 40.0);
}

#[tokio::test]
async fn test_metadata_missing_image() {
    let router = default_app(MockImageSource::new());
    let response = send(&router, get("/images/nope/metadata")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_presets_endpoint() {
    let router = default_app(MockImageSource::new());

    let response = send(&router, get("/presets")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["presets"]["lung"]["width"], 1500.0);
    assert_eq!(body["presets"]["lung"]["center"], -600.0);
    assert_eq!(body["presets"]["bone"]["width"], 2000.0);
    assert_eq!(body["presets"]["brain"]["center"], 40.0);
    assert!(body["usage"].as_str().unwrap().contains("preset"));
}

#[tokio::test]
async fn test_health_endpoint() {
    let router = default_app(MockImageSource::new());

    let response = send(&router, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_stats_endpoint_shape() {
    let router = default_app(MockImageSource::new());

    let body = json_body(send(&router, get("/stats")).await).await;
    assert_eq!(body["cache_enabled"], true);
    assert_eq!(body["workers"], 2);
    assert_eq!(body["images_rendered"], 0);
    assert_eq!(body["cache"]["entries"], 0);
}
