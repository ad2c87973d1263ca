//! Image service: the single-image processing pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                           ImageService                            │
//! │  get_image() / get_thumbnail() / get_metadata()                   │
//! │  1. Resolve window      4. Read bytes (on miss)                   │
//! │  2. Resolve source      5. decode → window → encode on the pool   │
//! │  3. Check cache         6. Write through, return                  │
//! └───────────────────────────────────────────────────────────────────┘
//!          │                      │                       │
//!          ▼                      ▼                       ▼
//!   ┌─────────────┐      ┌────────────────┐      ┌────────────────┐
//!   │ ImageSource │      │   CacheLayer   │      │   WorkerPool   │
//!   └─────────────┘      └────────────────┘      └────────────────┘
//! ```
//!
//! Concurrent requests for the same key are not coalesced: each computes
//! the same bytes and writes the same value.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::debug;

use crate::cache::{CacheKey, CacheLayer};
use crate::error::{CacheError, ImageError};
use crate::pixel::{self, DecodedImage, ImageMetadata, ResolvedWindow, WindowRequest};
use crate::render::{self, PngImageEncoder, RenderedImage, MAX_THUMBNAIL_SIZE};
use crate::source::{ImageSource, SourceRef};

use super::pool::WorkerPool;
use super::stats::{ProcessingStats, StatsSnapshot};

// =============================================================================
// Image Response
// =============================================================================

/// Response from the image service.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    /// The rendered image
    pub image: RenderedImage,

    /// Preset named by the request, if any
    pub preset: Option<&'static str>,

    /// Header attributes of the source image (full renders only)
    pub metadata: Option<ImageMetadata>,

    /// Whether the image was served from cache
    pub cache_hit: bool,
}

// =============================================================================
// Image Service
// =============================================================================

/// Service for rendering and caching DICOM images.
///
/// # Type Parameters
///
/// * `S` - The image source type (local directory or S3)
///
/// # Example
///
/// ```ignore
/// use dicom_imaging::service::{ImageService, WorkerPool};
/// use dicom_imaging::cache::{CacheLayer, MemoryBackend, TtlPolicy};
/// use dicom_imaging::pixel::WindowRequest;
/// use dicom_imaging::source::LocalImageSource;
///
/// let cache = CacheLayer::new(Arc::new(MemoryBackend::new()), TtlPolicy::default());
/// let service = ImageService::new(LocalImageSource::new("./dicom"), cache, WorkerPool::new(0)?);
///
/// let response = service.get_image("1", &WindowRequest::preset("lung")).await?;
/// println!("{}x{}, cache hit: {}", response.image.width, response.image.height, response.cache_hit);
/// ```
pub struct ImageService<S: ImageSource> {
    source: Arc<S>,
    cache: Arc<CacheLayer>,
    pool: Arc<WorkerPool>,
    encoder: PngImageEncoder,
    stats: Arc<ProcessingStats>,
}

impl<S: ImageSource> ImageService<S> {
    pub fn new(source: S, cache: CacheLayer, pool: WorkerPool) -> Self {
        Self {
            source: Arc::new(source),
            cache: Arc::new(cache),
            pool: Arc::new(pool),
            encoder: PngImageEncoder::new(),
            stats: Arc::new(ProcessingStats::new()),
        }
    }

    /// Create a service sharing its collaborators with other components.
    pub fn with_shared(
        source: Arc<S>,
        cache: Arc<CacheLayer>,
        pool: Arc<WorkerPool>,
        stats: Arc<ProcessingStats>,
    ) -> Self {
        Self {
            source,
            cache,
            pool,
            encoder: PngImageEncoder::new(),
            stats,
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn encoder(&self) -> PngImageEncoder {
        self.encoder
    }

    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    /// Render an image with the requested window, using cache when available.
    ///
    /// # Errors
    ///
    /// - [`ImageError::Window`] for non-finite window values
    /// - [`ImageError::SourceNotFound`] if the identifier does not resolve
    /// - [`ImageError::Decode`] / [`ImageError::Encode`] if processing fails
    ///
    /// The response carries the image's metadata. On a miss it is parsed
    /// from the same bytes as the pixel data, so the source is read once.
    ///
    /// Cache backend failures are never returned.
    pub async fn get_image(
        &self,
        image_id: &str,
        request: &WindowRequest,
    ) -> Result<ImageResponse, ImageError> {
        let window = request.resolve()?;
        let preset = window.preset;
        let source = self.resolve(image_id).await?;

        let key = CacheKey::for_image(&source.identity, &window);
        if let Some(image) = self.cache.get_json::<RenderedImage>(&key).await {
            self.stats.record_hit();
            debug!(image_id, "Image cache hit");
            let metadata = self.metadata_for(&source).await?;
            return Ok(ImageResponse {
                image,
                preset,
                metadata: Some(metadata),
                cache_hit: true,
            });
        }
        self.stats.record_miss();
        debug!(image_id, "Image cache miss");

        let bytes = self.read(&source).await?;
        let started = Instant::now();
        let (image, metadata) = self.render(image_id, bytes, window, Render::Full).await?;
        self.stats.record_image(started.elapsed());

        self.cache.set_json(&key, &image).await;
        if let Some(ref metadata) = metadata {
            self.cache
                .set_json(&CacheKey::for_metadata(&source.identity), metadata)
                .await;
        }

        Ok(ImageResponse {
            image,
            preset,
            metadata,
            cache_hit: false,
        })
    }

    /// Render a thumbnail whose longest edge is at most `max_size`.
    ///
    /// Thumbnails always use the auto window and live in their own cache
    /// namespace.
    pub async fn get_thumbnail(
        &self,
        image_id: &str,
        max_size: u32,
    ) -> Result<ImageResponse, ImageError> {
        if max_size == 0 || max_size > MAX_THUMBNAIL_SIZE {
            return Err(ImageError::InvalidThumbnailSize { size: max_size });
        }

        let window = ResolvedWindow::auto();
        let source = self.resolve(image_id).await?;

        let key = CacheKey::for_thumbnail(&source.identity, max_size, &window);
        if let Some(image) = self.cache.get_json::<RenderedImage>(&key).await {
            self.stats.record_hit();
            return Ok(ImageResponse {
                image,
                preset: None,
                metadata: None,
                cache_hit: true,
            });
        }
        self.stats.record_miss();

        let bytes = self.read(&source).await?;
        let started = Instant::now();
        let (image, _) = self
            .render(image_id, bytes, window, Render::Thumbnail(max_size))
            .await?;
        self.stats.record_thumbnail(started.elapsed());

        self.cache.set_json(&key, &image).await;

        Ok(ImageResponse {
            image,
            preset: None,
            metadata: None,
            cache_hit: false,
        })
    }

    /// Read header attributes without decoding pixel data.
    ///
    /// Metadata lookups are not counted in the image hit/miss statistics.
    pub async fn get_metadata(&self, image_id: &str) -> Result<ImageMetadata, ImageError> {
        let source = self.resolve(image_id).await?;
        self.metadata_for(&source).await
    }

    async fn metadata_for(&self, source: &SourceRef) -> Result<ImageMetadata, ImageError> {
        let key = CacheKey::for_metadata(&source.identity);
        if let Some(metadata) = self.cache.get_json::<ImageMetadata>(&key).await {
            return Ok(metadata);
        }

        let bytes = self.read(source).await?;
        let id = source.image_id.clone();
        let metadata = self
            .pool
            .run(move || {
                pixel::read_metadata(&bytes).map_err(|source| ImageError::Decode {
                    image_id: id,
                    source,
                })
            })
            .await??;

        self.cache.set_json(&key, &metadata).await;
        Ok(metadata)
    }

    /// Fetch and decode an image without windowing or caching.
    ///
    /// Used by volume assembly, which needs the rescaled samples.
    pub async fn decode_image(&self, image_id: &str) -> Result<DecodedImage, ImageError> {
        let source = self.resolve(image_id).await?;
        let bytes = self.read(&source).await?;
        let id = image_id.to_string();
        self.pool
            .run(move || {
                pixel::decode(&bytes).map_err(|source| ImageError::Decode {
                    image_id: id,
                    source,
                })
            })
            .await?
    }

    /// Delete cached entries matching `pattern`.
    pub async fn clear_cache(&self, pattern: &str) -> Result<usize, CacheError> {
        self.cache.invalidate(pattern).await
    }

    /// Delete every cached entry derived from one image.
    pub async fn invalidate_image(&self, image_id: &str) -> Result<usize, ImageError> {
        let source = self.resolve(image_id).await?;
        Ok(self.cache.invalidate_source(&source.identity).await?)
    }

    /// Current processing statistics.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.cache.error_count())
    }

    async fn resolve(&self, image_id: &str) -> Result<SourceRef, ImageError> {
        self.source
            .resolve(image_id)
            .await
            .map_err(|e| ImageError::from_source(image_id, e))
    }

    async fn read(&self, source: &SourceRef) -> Result<Bytes, ImageError> {
        self.source
            .read_bytes(source)
            .await
            .map_err(|e| ImageError::from_source(&source.image_id, e))
    }

    /// Decode, window, optionally downsample, and encode on the pool.
    ///
    /// Full renders also parse the header from the same bytes.
    async fn render(
        &self,
        image_id: &str,
        bytes: Bytes,
        window: ResolvedWindow,
        kind: Render,
    ) -> Result<(RenderedImage, Option<ImageMetadata>), ImageError> {
        let encoder = self.encoder;
        let id = image_id.to_string();

        self.pool
            .run(move || -> Result<_, ImageError> {
                let decode_error = |source| ImageError::Decode {
                    image_id: id.clone(),
                    source,
                };
                let decoded = pixel::decode(&bytes).map_err(decode_error)?;

                let spec = window.to_spec(&decoded.samples);
                let mut grid = pixel::apply(&decoded.samples, &spec, decoded.polarity);

                let encode_error = |source| ImageError::Encode {
                    image_id: id.clone(),
                    source,
                };
                let metadata = match kind {
                    Render::Full => Some(pixel::read_metadata(&bytes).map_err(decode_error)?),
                    Render::Thumbnail(max_size) => {
                        grid = render::downsample(&grid, max_size).map_err(encode_error)?;
                        None
                    }
                };

                let image = encoder.encode(&grid, spec).map_err(encode_error)?;
                Ok((image, metadata))
            })
            .await?
    }
}

/// What a pool job renders.
#[derive(Debug, Clone, Copy)]
enum Render {
    Full,
    Thumbnail(u32),
}

// =============================================================================
// Tests
// =============================================================================
