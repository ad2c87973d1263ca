//! HTTP server layer for the DICOM imaging service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │      GET /images/{id}   POST /volumes/mpr   POST /cache/clear   │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    auth     │  │        routes           │  │
//! │  │ (requests)  │  │(admin token)│  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{admin_auth_middleware, AdminAuth, AuthError};
pub use handlers::{
    health_handler, image_handler, AppState, CacheClearResponse, ErrorResponse, HealthResponse,
    ImageQueryParams, ImageResponseBody, MprRequest, MprResponseBody, PresetsResponse,
    StatsResponse, ThumbnailResponseBody, VolumeRequest, CACHE_HIT_HEADER,
};
pub use routes::{create_router, RouterConfig};
