//! # DICOM Imaging
//!
//! A rendering service for DICOM images stored on local disk or in
//! S3-compatible object storage.
//!
//! This library turns stored DICOM objects into display-ready PNG images. It
//! decodes native pixel data into Hounsfield-unit grids, applies window/level
//! transforms (explicit, preset, embedded or automatic), and caches the encoded
//! results so that repeated requests skip the pixel pipeline entirely.
//!
//! ## Features
//!
//! - **Pixel pipeline**: Rescale, window/level, inversion and PNG encoding on a dedicated worker pool
//! - **Clinical presets**: Lung, bone, brain, soft tissue and friends, with per-request overrides
//! - **Fail-open caching**: Collision-resistant keys, per-namespace TTLs, cache errors never fail a request
//! - **Volumes**: Concurrent slice loading, partial-volume handling and multi-planar reconstruction
//! - **Admin controls**: Pattern and per-image cache invalidation behind an optional bearer token
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`source`] - Image storage backends (local directory, S3)
//! - [`pixel`] - DICOM decoding, metadata, presets and the window/level engine
//! - [`render`] - PNG encoding and thumbnail downsampling
//! - [`cache`] - Cache backends and the fail-open cache layer
//! - [`service`] - Image orchestration, volume assembly and the worker pool
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use dicom_imaging::{
//!     create_router, AppState, CacheLayer, ImageService, LocalImageSource, MemoryBackend,
//!     RouterConfig, TtlPolicy, VolumeLimits, WorkerPool,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = LocalImageSource::new("./media/dicom_files");
//!     let cache = CacheLayer::new(Arc::new(MemoryBackend::new()), TtlPolicy::default());
//!     let pool = WorkerPool::new(0)?;
//!
//!     let images = ImageService::new(source, cache, pool);
//!     let state = AppState::new(images, VolumeLimits::default());
//!     let router = create_router(state, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8001").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod pixel;
pub mod render;
pub mod server;
pub mod service;
pub mod source;

// Re-export commonly used types
pub use cache::{
    BackendStats, CacheBackend, CacheKey, CacheLayer, MemoryBackend, Namespace, TtlPolicy,
};
pub use config::Config;
pub use error::{
    CacheError, DecodeError, EncodeError, ImageError, PoolError, SourceError, VolumeError,
    WindowError,
};
pub use pixel::{
    decode, read_metadata, DecodedImage, ImageMetadata, Preset, ResolvedWindow, WindowRequest,
    WindowSource, PRESETS,
};
pub use render::{PngImageEncoder, RenderedImage};
pub use server::{create_router, AppState, RouterConfig};
pub use service::{
    ImageResponse, ImageService, Orientation, ProcessingStats, StatsSnapshot, VolumeAssembler,
    VolumeLimits, WorkerPool,
};
pub use source::{create_s3_client, ImageSource, LocalImageSource, S3ImageSource, SourceRef};
