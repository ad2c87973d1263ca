//! Volume assembly and MPR tests.
//!
//! Tests verify:
//! - Slices stack in request order even when they load out of order
//! - Partial volumes, completeness thresholds and request limits
//! - Plane extraction along each orientation

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use dicom_imaging::{RouterConfig, VolumeLimits};

use super::test_utils::{
    build_app, decode_data_url, default_app, json_body, memory_cache, post_json, send,
    DicomBuilder, MockImageSource,
};

/// Three 4x6 slices filled with 0, 100 and 200, loading slowest first.
fn stacked_source() -> MockImageSource {
    MockImageSource::new()
        .with_delayed_image(
            "s0",
            DicomBuilder::new(4, 6).filled(0).build(),
            Duration::from_millis(80),
        )
        .with_delayed_image(
            "s1",
            DicomBuilder::new(4, 6).filled(100).build(),
            Duration::from_millis(40),
        )
        .with_image("s2", DicomBuilder::new(4, 6).filled(200).build())
}

/// Mean gray level of each row of a PNG.
fn row_means(png: &[u8]) -> Vec<f64> {
    let image = image::load_from_memory(png).unwrap().to_luma8();
    (0..image.height())
        .map(|y| {
            let sum: u64 = (0..image.width())
                .map(|x| image.get_pixel(x, y).0[0] as u64)
                .sum();
            sum as f64 / image.width() as f64
        })
        .collect()
}

// =============================================================================
// Volume Assembly
// =============================================================================

#[tokio::test]
async fn test_volume_summary() {
    let router = default_app(stacked_source());

    let response = send(
        &router,
        post_json("/volumes", json!({ "image_ids": ["s0", "s1", "s2"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["requested"], 3);
    assert_eq!(body["loaded"], 3);
    assert_eq!(body["partial"], false);
    assert_eq!(body["depth"], 3);
    assert_eq!(body["rows"], 4);
    assert_eq!(body["columns"], 6);
    assert_eq!(body["dropped"], json!([]));
}

#[tokio::test]
async fn test_slices_keep_request_order_when_slowest_first() {
    let router = default_app(stacked_source());

    // Coronal plane rows are slices, top to bottom
    let response = send(
        &router,
        post_json(
            "/volumes/mpr",
            json!({
                "image_ids": ["s0", "s1", "s2"],
                "orientation": "coronal",
                "index": 0,
                "window": 400.0,
                "level": 100.0
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["width"], 6);
    assert_eq!(body["height"], 3);
    assert_eq!(body["depth"], 3);
    assert_eq!(body["window_source"], "manual");

    let png = decode_data_url(body["image_data_url"].as_str().unwrap());
    let means = row_means(&png);
    assert_eq!(means.len(), 3);
    assert!(
        means[0] < means[1] && means[1] < means[2],
        "rows out of order: {:?}",
        means
    );
}

#[tokio::test]
async fn test_partial_volume_drops_missing_slices() {
    let router = default_app(stacked_source());

    let response = send(
        &router,
        post_json("/volumes", json!({ "image_ids": ["s0", "missing", "s2"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["requested"], 3);
    assert_eq!(body["loaded"], 2);
    assert_eq!(body["partial"], true);
    assert_eq!(body["depth"], 2);
    assert_eq!(body["dropped"], json!(["missing"]));
}

#[tokio::test]
async fn test_mismatched_slice_is_dropped() {
    let source = stacked_source().with_image("odd", DicomBuilder::new(8, 8).build());
    let router = default_app(source);

    let body = json_body(
        send(
            &router,
            post_json("/volumes", json!({ "image_ids": ["s0", "odd", "s1"] })),
        )
        .await,
    )
    .await;

    assert_eq!(body["loaded"], 2);
    assert_eq!(body["rows"], 4);
    assert_eq!(body["dropped"], json!(["odd"]));
}

#[tokio::test]
async fn test_completeness_threshold() {
    let router = build_app(
        stacked_source(),
        memory_cache(),
        VolumeLimits {
            max_slices: 10,
            min_completeness: 0.9,
        },
        RouterConfig::new(),
    );

    let response = send(
        &router,
        post_json("/volumes", json!({ "image_ids": ["s0", "s1", "missing"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"], "incomplete_volume");
}

#[tokio::test]
async fn test_no_slices_loaded() {
    let router = default_app(stacked_source());

    let response = send(
        &router,
        post_json("/volumes", json!({ "image_ids": ["a", "b"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"], "no_slices");
}

#[tokio::test]
async fn test_request_limits() {
    let router = build_app(
        stacked_source(),
        memory_cache(),
        VolumeLimits {
            max_slices: 2,
            min_completeness: 0.0,
        },
        RouterConfig::new(),
    );

    let response = send(&router, post_json("/volumes", json!({ "image_ids": [] }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "empty_request");

    let response = send(
        &router,
        post_json("/volumes", json!({ "image_ids": ["s0", "s1", "s2"] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "too_many_slices");
}

// =============================================================================
// MPR
// =============================================================================

#[tokio::test]
async fn test_mpr_plane_dimensions() {
    let router = default_app(stacked_source());
    let ids = json!(["s0", "s1", "s2"]);

    for (orientation, index, width, height) in [
        ("axial", 1, 6, 4),
        ("coronal", 3, 6, 3),
        ("sagittal", 5, 4, 3),
    ] {
        let response = send(
            &router,
            post_json(
                "/volumes/mpr",
                json!({
                    "image_ids": ids,
                    "orientation": orientation,
                    "index": index,
                    "preset": "soft_tissue"
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK, "{}", orientation);

        let body = json_body(response).await;
        assert_eq!(body["orientation"], orientation);
        assert_eq!(body["index"], index);
        assert_eq!(body["width"], width, "{}", orientation);
        assert_eq!(body["height"], height, "{}", orientation);
        assert_eq!(body["window"], 400.0);
        assert_eq!(body["level"], 40.0);
        assert_eq!(body["window_source"], "preset");
    }
}

#[tokio::test]
async fn test_mpr_index_out_of_range() {
    let router = default_app(stacked_source());

    let response = send(
        &router,
        post_json(
            "/volumes/mpr",
            json!({ "image_ids": ["s0", "s1", "s2"], "orientation": "axial", "index": 3 }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "plane_out_of_range");
}

#[tokio::test]
async fn test_mpr_unknown_preset_uses_auto_window() {
    let router = default_app(stacked_source());

    let response = send(
        &router,
        post_json(
            "/volumes/mpr",
            json!({
                "image_ids": ["s0", "s1"],
                "orientation": "axial",
                "index": 0,
                "preset": "nope"
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["window_source"], "auto");
}

#[tokio::test]
async fn test_mpr_invalid_orientation() {
    let router = default_app(stacked_source());

    let response = send(
        &router,
        post_json(
            "/volumes/mpr",
            json!({ "image_ids": ["s0"], "orientation": "oblique", "index": 0 }),
        ),
    )
    .await;
    assert!(response.status().is_client_error());
}
