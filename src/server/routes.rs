//! Router configuration for the DICOM imaging API.
//!
//! This module defines the HTTP routes and applies middleware for admin
//! authentication, CORS and tracing.
//!
//! # Route Structure
//!
//! ```text
//! /health                          - Health check (public)
//! /presets                         - Preset table (public)
//! /stats                           - Processing statistics (public)
//! /images/{id}                     - Rendered image (public)
//! /images/{id}/thumbnail           - Thumbnail (public)
//! /images/{id}/metadata            - Header attributes (public)
//! /volumes, /volumes/mpr           - Volume assembly and MPR (public)
//! /cache/clear                     - Clear by pattern (admin)
//! /images/{id}/cache/clear         - Clear one image (admin)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dicom_imaging::server::{create_router, AppState, RouterConfig};
//! use dicom_imaging::service::VolumeLimits;
//!
//! let state = AppState::new(image_service, VolumeLimits::default());
//! let config = RouterConfig::new()
//!     .with_admin_token("s3cret")
//!     .with_cors_origins(vec!["https://viewer.example.com".to_string()]);
//!
//! let router = create_router(state, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8001").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{admin_auth_middleware, AdminAuth};
use super::handlers::{
    clear_cache_handler, clear_image_cache_handler, health_handler, image_handler,
    metadata_handler, mpr_handler, presets_handler, stats_handler, thumbnail_handler,
    volume_handler, AppState,
};
use crate::source::ImageSource;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone, Default)]
pub struct RouterConfig {
    /// Bearer token for admin routes (None = admin routes are open)
    pub admin_token: Option<String>,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - Admin routes are open
    /// - CORS allows any origin
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            admin_token: None,
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Require a bearer token on admin routes.
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// This function builds the complete Axum router with:
/// - Public routes (images, presets, volumes, stats, health)
/// - Admin routes (cache clearing), token-guarded when configured
/// - CORS configuration
/// - Request tracing (optional)
pub fn create_router<S>(state: AppState<S>, config: RouterConfig) -> Router
where
    S: ImageSource,
{
    let cors = build_cors_layer(&config);

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/presets", get(presets_handler))
        .route("/stats", get(stats_handler::<S>))
        .route("/images/{id}", get(image_handler::<S>))
        .route("/images/{id}/thumbnail", get(thumbnail_handler::<S>))
        .route("/images/{id}/metadata", get(metadata_handler::<S>))
        .route("/volumes", post(volume_handler::<S>))
        .route("/volumes/mpr", post(mpr_handler::<S>))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/cache/clear", post(clear_cache_handler::<S>))
        .route("/images/{id}/cache/clear", post(clear_image_cache_handler::<S>))
        .with_state(state);

    let admin_routes = match &config.admin_token {
        Some(token) => admin_routes.layer(middleware::from_fn_with_state(
            AdminAuth::new(token),
            admin_auth_middleware,
        )),
        None => admin_routes,
    };

    let router = Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(cors);

    // Add tracing if enabled
    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => {
            // No origins allowed - this effectively disables CORS
            cors
        }
        Some(origins) => {
            // Parse origins into HeaderValues
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
