//! HTTP request handlers for the DICOM imaging API.
//!
//! # Endpoints
//!
//! - `GET /images/{id}` - Windowed image as a PNG data URI
//! - `GET /images/{id}/thumbnail` - Downsampled image
//! - `GET /images/{id}/metadata` - Header attributes
//! - `GET /presets` - Window/level preset table
//! - `POST /volumes` - Assemble a volume from slices
//! - `POST /volumes/mpr` - Render a reconstructed plane
//! - `POST /cache/clear`, `POST /images/{id}/cache/clear` - Admin cache control
//! - `GET /stats`, `GET /health`

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::{BackendStats, ALL_KEYS_PATTERN};
use crate::error::{CacheError, ImageError, VolumeError, WindowError};
use crate::pixel::{presets, ImageMetadata, Preset, WindowRequest};
use crate::render::DEFAULT_THUMBNAIL_SIZE;
use crate::service::{
    ImageService, Orientation, StatsSnapshot, VolumeAssembler, VolumeLimits, VolumeSummary,
};
use crate::source::ImageSource;

/// Header reporting whether a response was served from cache.
pub const CACHE_HIT_HEADER: &str = "x-cache-hit";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<S: ImageSource> {
    /// Single-image pipeline
    pub images: Arc<ImageService<S>>,

    /// Volume assembly on top of the image pipeline
    pub volumes: Arc<VolumeAssembler<S>>,
}

impl<S: ImageSource> AppState<S> {
    pub fn new(images: ImageService<S>, limits: VolumeLimits) -> Self {
        let images = Arc::new(images);
        let volumes = Arc::new(VolumeAssembler::new(Arc::clone(&images), limits));
        Self { images, volumes }
    }
}

impl<S: ImageSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            images: Arc::clone(&self.images),
            volumes: Arc::clone(&self.volumes),
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for image requests.
#[derive(Debug, Default, Deserialize)]
pub struct ImageQueryParams {
    /// Window width
    #[serde(default)]
    pub window: Option<f64>,

    /// Window center
    #[serde(default)]
    pub level: Option<f64>,

    /// Preset name supplying missing window fields
    #[serde(default)]
    pub preset: Option<String>,

    /// Invert output intensities (`true`/`1`/`yes`/`on` or their negations)
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub invert: bool,
}

/// A boolean that also accepts the usual query-string spellings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(serde::de::Error::custom(format!(
                "invalid boolean flag: {}",
                text
            ))),
        },
    }
}

impl ImageQueryParams {
    pub fn to_window_request(&self) -> WindowRequest {
        window_request(self.window, self.level, self.preset.as_deref(), self.invert)
    }
}

fn window_request(
    width: Option<f64>,
    center: Option<f64>,
    preset: Option<&str>,
    invert: bool,
) -> WindowRequest {
    WindowRequest {
        width,
        center,
        // An empty preset parameter means no preset
        preset: preset.filter(|p| !p.is_empty()).map(str::to_string),
        invert,
    }
}

/// Query parameters for thumbnail requests.
#[derive(Debug, Deserialize)]
pub struct ThumbnailQueryParams {
    /// Longest edge of the thumbnail (default: 256, max: 2048)
    #[serde(default = "default_thumbnail_size")]
    pub size: u32,
}

fn default_thumbnail_size() -> u32 {
    DEFAULT_THUMBNAIL_SIZE
}

/// Query parameters for cache clearing.
#[derive(Debug, Deserialize)]
pub struct CacheClearParams {
    /// Glob pattern of keys to delete (default: every key)
    #[serde(default = "default_clear_pattern")]
    pub pattern: String,
}

fn default_clear_pattern() -> String {
    ALL_KEYS_PATTERN.to_string()
}

/// Body of a volume request.
#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    /// Slice identifiers in stack order
    pub image_ids: Vec<String>,
}

/// Body of an MPR request.
#[derive(Debug, Deserialize)]
pub struct MprRequest {
    /// Slice identifiers in stack order
    pub image_ids: Vec<String>,

    pub orientation: Orientation,

    /// Plane index along the orientation's axis
    pub index: usize,

    #[serde(default)]
    pub window: Option<f64>,

    #[serde(default)]
    pub level: Option<f64>,

    #[serde(default)]
    pub preset: Option<String>,

    #[serde(default)]
    pub invert: bool,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "decode_error")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response from the image endpoint.
#[derive(Debug, Serialize)]
pub struct ImageResponseBody {
    pub image_id: String,

    /// `data:image/png;base64,...`
    pub image_data_url: String,

    pub width: u32,
    pub height: u32,
    pub metadata: ImageMetadata,

    /// Applied window width
    pub window: f64,

    /// Applied window center
    pub level: f64,

    /// Preset named by the request
    pub preset: Option<String>,

    /// `manual`, `preset` or `auto`
    pub window_source: &'static str,

    pub invert: bool,
    pub format: &'static str,
    pub cached: bool,
}

/// Response from the thumbnail endpoint.
#[derive(Debug, Serialize)]
pub struct ThumbnailResponseBody {
    pub image_id: String,
    pub thumbnail_url: String,

    /// Requested bound on the longest edge
    pub size: u32,

    pub width: u32,
    pub height: u32,
    pub cached: bool,
}

/// Response from the presets endpoint.
#[derive(Debug, Serialize)]
pub struct PresetsResponse {
    pub presets: BTreeMap<&'static str, &'static Preset>,
    pub usage: &'static str,
}

/// Response from the cache-clearing endpoints.
#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub success: bool,
    pub removed: usize,
    pub pattern: String,
    pub message: String,
}

/// Response from the MPR endpoint.
#[derive(Debug, Serialize)]
pub struct MprResponseBody {
    pub image_data_url: String,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
    pub index: usize,
    pub depth: usize,
    pub window: f64,
    pub level: f64,
    pub window_source: &'static str,
    pub loaded: usize,
    pub requested: usize,
}

/// Response from the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub processing: StatsSnapshot,

    pub cache_enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<BackendStats>,

    pub workers: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Build a JSON error response, logging by severity:
/// 5xx at ERROR, 404 at DEBUG, other 4xx at WARN.
fn error_response(status: StatusCode, error_type: &'static str, message: String) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else if status.is_client_error() {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let error_response = ErrorResponse::with_status(error_type, message, status);
    (status, Json(error_response)).into_response()
}

fn window_error_kind(err: &WindowError) -> &'static str {
    match err {
        WindowError::NonFinite { .. } => "invalid_window",
    }
}

/// Convert ImageError to HTTP response.
impl IntoResponse for ImageError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            // 404 Not Found
            ImageError::SourceNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),

            // 400 Bad Request - Invalid parameters
            ImageError::Window(err) => (StatusCode::BAD_REQUEST, window_error_kind(err)),
            ImageError::InvalidThumbnailSize { .. } => (StatusCode::BAD_REQUEST, "invalid_size"),

            // 422 - The object exists but cannot be processed
            ImageError::Decode { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "decode_error"),
            ImageError::Encode { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "encode_error"),

            // 5xx - Infrastructure
            ImageError::Source { .. } => (StatusCode::BAD_GATEWAY, "storage_error"),
            ImageError::Cache(_) => (StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable"),
            ImageError::Worker(_) => (StatusCode::INTERNAL_SERVER_ERROR, "worker_error"),
        };

        error_response(status, error_type, self.to_string())
    }
}

/// Convert VolumeError to HTTP response.
impl IntoResponse for VolumeError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            VolumeError::EmptyRequest => (StatusCode::BAD_REQUEST, "empty_request"),
            VolumeError::TooManySlices { .. } => (StatusCode::BAD_REQUEST, "too_many_slices"),
            VolumeError::PlaneOutOfRange { .. } => (StatusCode::BAD_REQUEST, "plane_out_of_range"),
            VolumeError::Window(err) => (StatusCode::BAD_REQUEST, window_error_kind(err)),

            VolumeError::NoSlices { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "no_slices"),
            VolumeError::Incomplete { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "incomplete_volume")
            }
            VolumeError::Encode(_) => (StatusCode::UNPROCESSABLE_ENTITY, "encode_error"),

            VolumeError::Worker(_) => (StatusCode::INTERNAL_SERVER_ERROR, "worker_error"),
        };

        error_response(status, error_type, self.to_string())
    }
}

/// Convert CacheError to HTTP response.
///
/// Only reachable from explicit invalidation; image requests absorb cache
/// failures.
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "cache_unavailable",
            self.to_string(),
        )
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Render an image.
///
/// # Endpoint
///
/// `GET /images/{id}?window=&level=&preset=&invert=`
///
/// Explicit `window`/`level` override the preset field by field. Without
/// either, the window is derived from the image's percentiles.
///
/// # Response
///
/// - `200 OK`: JSON body with a PNG data URI, `X-Cache-Hit: true|false`
/// - `400 Bad Request`: Invalid window
/// - `404 Not Found`: Image not found
/// - `422 Unprocessable Entity`: Decode or encode failure
pub async fn image_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Path(image_id): Path<String>,
    Query(query): Query<ImageQueryParams>,
) -> Result<Response, ImageError> {
    let request = query.to_window_request();

    let mut rendered = state.images.get_image(&image_id, &request).await?;
    let metadata = match rendered.metadata.take() {
        Some(metadata) => metadata,
        None => state.images.get_metadata(&image_id).await?,
    };

    let image = &rendered.image;
    let body = ImageResponseBody {
        image_data_url: image.data_url(),
        width: image.width,
        height: image.height,
        metadata,
        window: image.window.width,
        level: image.window.center,
        preset: rendered.preset.map(str::to_string),
        window_source: image.window.source.label(),
        invert: image.window.invert,
        format: "base64_png",
        cached: rendered.cache_hit,
        image_id,
    };

    Ok(with_cache_header(Json(body), rendered.cache_hit))
}

/// Render a thumbnail.
///
/// # Endpoint
///
/// `GET /images/{id}/thumbnail?size=256`
pub async fn thumbnail_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Path(image_id): Path<String>,
    Query(query): Query<ThumbnailQueryParams>,
) -> Result<Response, ImageError> {
    let rendered = state.images.get_thumbnail(&image_id, query.size).await?;

    let body = ThumbnailResponseBody {
        thumbnail_url: rendered.image.data_url(),
        size: query.size,
        width: rendered.image.width,
        height: rendered.image.height,
        cached: rendered.cache_hit,
        image_id,
    };

    Ok(with_cache_header(Json(body), rendered.cache_hit))
}

/// Return header attributes of an image.
///
/// # Endpoint
///
/// `GET /images/{id}/metadata`
pub async fn metadata_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Path(image_id): Path<String>,
) -> Result<Json<ImageMetadata>, ImageError> {
    Ok(Json(state.images.get_metadata(&image_id).await?))
}

/// List window/level presets.
///
/// # Endpoint
///
/// `GET /presets`
pub async fn presets_handler() -> Json<PresetsResponse> {
    Json(PresetsResponse {
        presets: presets::all().map(|p| (p.name, p)).collect(),
        usage: "Pass ?preset=<name> to /images/{id}. Explicit window and level \
                override the preset's values.",
    })
}

/// Delete cached entries matching a pattern.
///
/// # Endpoint
///
/// `POST /cache/clear?pattern=dicom:*`
///
/// Requires `Authorization: Bearer <token>` when an admin token is
/// configured.
pub async fn clear_cache_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Query(params): Query<CacheClearParams>,
) -> Result<Json<CacheClearResponse>, CacheError> {
    let removed = state.images.clear_cache(&params.pattern).await?;
    info!(pattern = %params.pattern, removed, "Cache cleared");

    Ok(Json(CacheClearResponse {
        success: true,
        removed,
        message: format!("Removed {} cache entries", removed),
        pattern: params.pattern,
    }))
}

/// Delete every cached entry derived from one image.
///
/// # Endpoint
///
/// `POST /images/{id}/cache/clear`
pub async fn clear_image_cache_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Path(image_id): Path<String>,
) -> Result<Json<CacheClearResponse>, ImageError> {
    let removed = state.images.invalidate_image(&image_id).await?;
    info!(image_id = %image_id, removed, "Image cache cleared");

    Ok(Json(CacheClearResponse {
        success: true,
        removed,
        pattern: format!("image:{}", image_id),
        message: format!("Removed {} cache entries for image {}", removed, image_id),
    }))
}

/// Assemble a volume and describe it.
///
/// # Endpoint
///
/// `POST /volumes` with `{"image_ids": [...]}`
pub async fn volume_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Json(request): Json<VolumeRequest>,
) -> Result<Json<VolumeSummary>, VolumeError> {
    let volume = state.volumes.build_volume(&request.image_ids).await?;
    Ok(Json(volume.summary()))
}

/// Render one reconstructed plane of a volume.
///
/// # Endpoint
///
/// `POST /volumes/mpr` with
/// `{"image_ids": [...], "orientation": "coronal", "index": 64, "preset": "bone"}`
pub async fn mpr_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Json(request): Json<MprRequest>,
) -> Result<Json<MprResponseBody>, VolumeError> {
    let window = window_request(
        request.window,
        request.level,
        request.preset.as_deref(),
        request.invert,
    );

    let plane = state
        .volumes
        .render_plane(&request.image_ids, request.orientation, request.index, &window)
        .await?;

    Ok(Json(MprResponseBody {
        image_data_url: plane.image.data_url(),
        width: plane.image.width,
        height: plane.image.height,
        orientation: plane.orientation,
        index: plane.index,
        depth: plane.volume.depth,
        window: plane.image.window.width,
        level: plane.image.window.center,
        window_source: plane.image.window.source.label(),
        loaded: plane.volume.loaded,
        requested: plane.volume.requested,
    }))
}

/// Processing and cache statistics.
///
/// # Endpoint
///
/// `GET /stats`
pub async fn stats_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
) -> Json<StatsResponse> {
    let images = &state.images;
    Json(StatsResponse {
        processing: images.stats_snapshot(),
        cache_enabled: images.cache().is_enabled(),
        cache: images.cache().backend_stats().await,
        workers: images.pool().size(),
    })
}

fn with_cache_header(body: impl IntoResponse, cache_hit: bool) -> Response {
    let mut response = body.into_response();
    response.headers_mut().insert(
        CACHE_HIT_HEADER,
        HeaderValue::from_static(if cache_hit { "true" } else { "false" }),
    );
    response
}

// =============================================================================
// Tests
// =============================================================================
