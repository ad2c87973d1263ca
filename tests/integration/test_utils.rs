//! Test utilities for integration tests.
//!
//! This module provides mock sources and cache backends, and a builder for
//! small in-memory DICOM files.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower::ServiceExt;

use dicom_imaging::cache::{BackendStats, CacheBackend};
use dicom_imaging::error::{CacheError, SourceError};
use dicom_imaging::source::{ImageSource, SourceRef};
use dicom_imaging::{
    create_router, AppState, CacheLayer, ImageService, MemoryBackend, RouterConfig, TtlPolicy,
    VolumeLimits, WorkerPool,
};

// =============================================================================
// DICOM Builder
// =============================================================================

/// Builds a single-frame CT image with 16-bit signed samples.
#[derive(Debug, Clone)]
pub struct DicomBuilder {
    rows: u16,
    columns: u16,
    pixels: Vec<i16>,
    rescale: Option<(f64, f64)>,
    window: Option<(f64, f64)>,
    patient_id: Option<String>,
    instance_number: Option<i32>,
}

impl DicomBuilder {
    /// A `rows x columns` image whose samples ramp from -1000 to 2990.
    pub fn new(rows: u16, columns: u16) -> Self {
        let count = rows as usize * columns as usize;
        let pixels = (0..count).map(|i| ((i % 400) as i16) * 10 - 1000).collect();
        Self {
            rows,
            columns,
            pixels,
            rescale: None,
            window: None,
            patient_id: None,
            instance_number: None,
        }
    }

    /// Every sample set to `value`.
    pub fn filled(mut self, value: i16) -> Self {
        self.pixels.iter_mut().for_each(|p| *p = value);
        self
    }

    pub fn with_pixels(mut self, pixels: Vec<i16>) -> Self {
        assert_eq!(pixels.len(), self.rows as usize * self.columns as usize);
        self.pixels = pixels;
        self
    }

    pub fn with_rescale(mut self, slope: f64, intercept: f64) -> Self {
        self.rescale = Some((slope, intercept));
        self
    }

    pub fn with_window(mut self, width: f64, center: f64) -> Self {
        self.window = Some((width, center));
        self
    }

    pub fn with_patient_id(mut self, patient_id: &str) -> Self {
        self.patient_id = Some(patient_id.to_string());
        self
    }

    pub fn with_instance_number(mut self, number: i32) -> Self {
        self.instance_number = Some(number);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut obj = InMemDicomObject::new_empty();
        let put_str = |obj: &mut InMemDicomObject, tag: dicom_core::Tag, vr: VR, value: &str| {
            obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        };

        put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE);
        put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, "1.2.826.0.1.3680043.2");
        put_str(&mut obj, tags::MODALITY, VR::CS, "CT");
        put_str(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");

        for (tag, value) in [
            (tags::SAMPLES_PER_PIXEL, 1u16),
            (tags::ROWS, self.rows),
            (tags::COLUMNS, self.columns),
            (tags::BITS_ALLOCATED, 16),
            (tags::BITS_STORED, 16),
            (tags::HIGH_BIT, 15),
            (tags::PIXEL_REPRESENTATION, 1),
        ] {
            obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
        }

        if let Some(ref patient_id) = self.patient_id {
            put_str(&mut obj, tags::PATIENT_ID, VR::LO, patient_id);
        }
        if let Some(number) = self.instance_number {
            put_str(&mut obj, tags::INSTANCE_NUMBER, VR::IS, &number.to_string());
        }
        if let Some((slope, intercept)) = self.rescale {
            put_str(&mut obj, tags::RESCALE_SLOPE, VR::DS, &slope.to_string());
            put_str(&mut obj, tags::RESCALE_INTERCEPT, VR::DS, &intercept.to_string());
        }
        if let Some((width, center)) = self.window {
            put_str(&mut obj, tags::WINDOW_WIDTH, VR::DS, &width.to_string());
            put_str(&mut obj, tags::WINDOW_CENTER, VR::DS, &center.to_string());
        }

        let pixel_bytes: Vec<u8> = self.pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
        obj.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::from(pixel_bytes),
        ));

        let file = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid("1.2.826.0.1.3680043.2"),
            )
            .unwrap();

        let mut out = Vec::new();
        file.write_all(&mut out).unwrap();
        out
    }
}

// =============================================================================
// Mock Image Source
// =============================================================================

/// A stored object with an optional artificial read latency.
#[derive(Clone)]
struct MockObject {
    data: Bytes,
    delay: Duration,
}

/// An in-memory image source that counts reads per image.
pub struct MockImageSource {
    objects: HashMap<String, MockObject>,
    read_counts: Arc<RwLock<HashMap<String, usize>>>,
    total_reads: Arc<AtomicUsize>,
}

impl MockImageSource {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            read_counts: Arc::new(RwLock::new(HashMap::new())),
            total_reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_image(self, image_id: impl Into<String>, data: Vec<u8>) -> Self {
        self.with_delayed_image(image_id, data, Duration::ZERO)
    }

    /// Add an image whose reads complete only after `delay`.
    pub fn with_delayed_image(
        mut self,
        image_id: impl Into<String>,
        data: Vec<u8>,
        delay: Duration,
    ) -> Self {
        self.objects.insert(
            image_id.into(),
            MockObject {
                data: Bytes::from(data),
                delay,
            },
        );
        self
    }

    /// Handle for observing read counts after the source is moved into a service.
    pub fn reads(&self) -> ReadCounter {
        ReadCounter {
            per_image: Arc::clone(&self.read_counts),
            total: Arc::clone(&self.total_reads),
        }
    }
}

impl Default for MockImageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn resolve(&self, image_id: &str) -> Result<SourceRef, SourceError> {
        if !self.objects.contains_key(image_id) {
            return Err(SourceError::NotFound(image_id.to_string()));
        }
        Ok(SourceRef {
            image_id: image_id.to_string(),
            key: image_id.to_string(),
            identity: format!("mock://{}", image_id),
        })
    }

    async fn read_bytes(&self, source: &SourceRef) -> Result<Bytes, SourceError> {
        let object = self
            .objects
            .get(&source.key)
            .ok_or_else(|| SourceError::NotFound(source.key.clone()))?;

        if !object.delay.is_zero() {
            tokio::time::sleep(object.delay).await;
        }

        self.total_reads.fetch_add(1, Ordering::SeqCst);
        *self
            .read_counts
            .write()
            .await
            .entry(source.key.clone())
            .or_insert(0) += 1;

        Ok(object.data.clone())
    }
}

/// Shared view of a [`MockImageSource`]'s read counters.
#[derive(Clone)]
pub struct ReadCounter {
    per_image: Arc<RwLock<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
}

impl ReadCounter {
    pub async fn for_image(&self, image_id: &str) -> usize {
        self.per_image
            .read()
            .await
            .get(image_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Failing Cache Backend
// =============================================================================

/// A cache backend where every operation fails, like an unreachable server.
pub struct FailingBackend {
    pub calls: AtomicUsize,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn fail<T>(&self) -> Result<T, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("connection refused".to_string()))
    }
}

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
        self.fail()
    }

    async fn set_ex(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
        self.fail()
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CacheError> {
        self.fail()
    }

    async fn del(&self, _keys: &[String]) -> Result<usize, CacheError> {
        self.fail()
    }

    async fn stats(&self) -> Option<BackendStats> {
        None
    }
}

// =============================================================================
// App Construction
// =============================================================================

/// A memory-backed cache layer with default TTLs.
pub fn memory_cache() -> CacheLayer {
    CacheLayer::new(Arc::new(MemoryBackend::new()), TtlPolicy::default())
}

/// Build a router over `source` with the given cache and router settings.
pub fn build_app<S: ImageSource>(
    source: S,
    cache: CacheLayer,
    limits: VolumeLimits,
    config: RouterConfig,
) -> Router {
    let pool = WorkerPool::new(2).unwrap();
    let images = ImageService::new(source, cache, pool);
    create_router(AppState::new(images, limits), config.with_tracing(false))
}

/// Router with a memory cache, default limits and open admin routes.
pub fn default_app<S: ImageSource>(source: S) -> Router {
    build_app(
        source,
        memory_cache(),
        VolumeLimits::default(),
        RouterConfig::new(),
    )
}

// =============================================================================
// Request Helpers
// =============================================================================

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Send a request and return the response.
pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

/// Collect a response body as JSON.
pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Decode a `data:image/png;base64,...` URI into its PNG bytes.
pub fn decode_data_url(url: &str) -> Vec<u8> {
    use base64::Engine;
    let payload = url
        .strip_prefix("data:image/png;base64,")
        .expect("not a PNG data URI");
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .unwrap()
}

/// Check that the data is a PNG file.
pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
}
