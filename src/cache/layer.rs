//! Cache layer: key derivation, TTL classes and the fail-open policy.
//!
//! # Key Shape
//!
//! ```text
//! dicom:{namespace}:{source_digest}:{params_digest}
//!        │           │               └─ SHA-256 over every key field
//!        │           └─ first 16 hex chars of SHA-256(source identity)
//!        └─ processed | thumb | meta
//! ```
//!
//! The parameter digest covers the full source identity as well, so two
//! sources sharing a digest prefix still get distinct keys. Fields are
//! length-prefixed before hashing so no concatenation of values can alias
//! another.
//!
//! # Failure Policy
//!
//! Backend errors never reach the caller. A failed read is a miss, a failed
//! write is skipped. Both are logged at `warn` and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::pixel::{ResolvedWindow, WindowMode, WindowSource};

use super::backend::{BackendStats, CacheBackend};

/// Prefix shared by every key this layer writes.
pub const KEY_PREFIX: &str = "dicom";

/// Pattern matching every key this layer writes.
pub const ALL_KEYS_PATTERN: &str = "dicom:*";

/// Hex characters of the source digest embedded in a key.
const SOURCE_DIGEST_LEN: usize = 16;

// =============================================================================
// TTL Policy
// =============================================================================

/// Time-to-live per entry class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Full-resolution rendered images
    pub image: Duration,

    /// Thumbnails
    pub thumbnail: Duration,

    /// Header-only metadata
    pub metadata: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            image: Duration::from_secs(30 * 60),
            thumbnail: Duration::from_secs(60 * 60),
            metadata: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl TtlPolicy {
    pub fn for_namespace(&self, namespace: Namespace) -> Duration {
        match namespace {
            Namespace::Processed => self.image,
            Namespace::Thumbnail => self.thumbnail,
            Namespace::Metadata => self.metadata,
        }
    }
}

// =============================================================================
// Keys
// =============================================================================

/// Key namespace. Entries in different namespaces never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Processed,
    Thumbnail,
    Metadata,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Processed => "processed",
            Namespace::Thumbnail => "thumb",
            Namespace::Metadata => "meta",
        }
    }
}

/// A derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    key: String,
}

impl CacheKey {
    /// Key for a full-resolution image rendered with `window`.
    pub fn for_image(source: &str, window: &ResolvedWindow) -> Self {
        Self::key_for(Namespace::Processed, source, None, window)
    }

    /// Key for a thumbnail bounded by `max_size`.
    pub fn for_thumbnail(source: &str, max_size: u32, window: &ResolvedWindow) -> Self {
        Self::key_for(Namespace::Thumbnail, source, Some(max_size), window)
    }

    /// Key for header metadata.
    pub fn for_metadata(source: &str) -> Self {
        let mut hasher = KeyHasher::new(Namespace::Metadata, source);
        hasher.field("kind", b"metadata");
        hasher.finish(source)
    }

    /// Derive a key from the source identity, an optional output size and the
    /// resolved window.
    ///
    /// Pure: the same arguments always yield the same key. Fields are hashed
    /// in a fixed order, so the order in which a caller supplied request
    /// parameters does not matter.
    pub fn key_for(
        namespace: Namespace,
        source: &str,
        size: Option<u32>,
        window: &ResolvedWindow,
    ) -> Self {
        let mut hasher = KeyHasher::new(namespace, source);

        match &window.mode {
            WindowMode::Fixed {
                width,
                center,
                source: window_source,
            } => {
                hasher.field("mode", b"fixed");
                hasher.float("width", *width);
                hasher.float("center", *center);
                let tag = match window_source {
                    WindowSource::Manual => "manual",
                    WindowSource::Preset(_) => "preset",
                    WindowSource::Auto => "auto",
                };
                hasher.field("window_source", tag.as_bytes());
            }
            WindowMode::Auto => hasher.field("mode", b"auto"),
        }

        hasher.field("preset", window.preset.unwrap_or("").as_bytes());
        hasher.field("invert", &[u8::from(window.invert)]);
        if let Some(size) = size {
            hasher.field("size", &size.to_le_bytes());
        }

        hasher.finish(source)
    }

    /// Pattern matching every key derived from `source`, in every namespace.
    pub fn source_pattern(source: &str) -> String {
        format!("{}:*:{}:*", KEY_PREFIX, source_digest(source))
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

fn source_digest(source: &str) -> String {
    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    digest[..SOURCE_DIGEST_LEN].to_string()
}

/// Length-prefixed field hasher.
struct KeyHasher {
    namespace: Namespace,
    hasher: Sha256,
}

impl KeyHasher {
    fn new(namespace: Namespace, source: &str) -> Self {
        let mut this = Self {
            namespace,
            hasher: Sha256::new(),
        };
        this.field("namespace", namespace.as_str().as_bytes());
        this.field("source", source.as_bytes());
        this
    }

    fn field(&mut self, name: &str, value: &[u8]) {
        self.hasher.update((name.len() as u64).to_le_bytes());
        self.hasher.update(name.as_bytes());
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
    }

    fn float(&mut self, name: &str, value: f64) {
        // -0.0 and 0.0 window identically
        let value = if value == 0.0 { 0.0 } else { value };
        self.field(name, &value.to_bits().to_le_bytes());
    }

    fn finish(self, source: &str) -> CacheKey {
        let params = hex::encode(self.hasher.finalize());
        CacheKey {
            namespace: self.namespace,
            key: format!(
                "{}:{}:{}:{}",
                KEY_PREFIX,
                self.namespace.as_str(),
                source_digest(source),
                params
            ),
        }
    }
}

// =============================================================================
// Cache Layer
// =============================================================================

/// Fail-open cache in front of a [`CacheBackend`].
///
/// Owns key derivation and the TTL policy; storage is delegated to the
/// backend. A disabled layer reports every read as a miss and drops writes.
pub struct CacheLayer {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: TtlPolicy,
    errors: AtomicU64,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: TtlPolicy) -> Self {
        Self {
            backend: Some(backend),
            ttl,
            errors: AtomicU64::new(0),
        }
    }

    /// A layer that never stores anything.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: TtlPolicy::default(),
            errors: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Number of backend errors absorbed so far.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn record_error(&self, operation: &'static str, key: &str, err: &CacheError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(operation, key, error = %err, "Cache backend error, continuing without cache");
    }

    /// Fetch raw bytes. Backend errors are reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let backend = self.backend.as_ref()?;
        match backend.get(key.as_str()).await {
            Ok(hit) => {
                debug!(key = key.as_str(), hit = hit.is_some(), "Cache lookup");
                hit
            }
            Err(err) => {
                self.record_error("get", key.as_str(), &err);
                None
            }
        }
    }

    /// Store raw bytes with the key's TTL class. Best effort.
    pub async fn set(&self, key: &CacheKey, value: Bytes) {
        let ttl = self.ttl.for_namespace(key.namespace());
        self.set_with_ttl(key, value, ttl).await;
    }

    /// Store raw bytes with an explicit TTL. Best effort.
    pub async fn set_with_ttl(&self, key: &CacheKey, value: Bytes, ttl: Duration) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if let Err(err) = backend.set_ex(key.as_str(), value, ttl).await {
            self.record_error("set", key.as_str(), &err);
        }
    }

    /// Fetch and deserialize a JSON payload.
    ///
    /// An undecodable payload is treated like a backend error: a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_error(
                    "decode",
                    key.as_str(),
                    &CacheError::Serialization(e.to_string()),
                );
                None
            }
        }
    }

    /// Serialize a value as JSON and store it.
    pub async fn set_json<T: Serialize>(&self, key: &CacheKey, value: &T) {
        if !self.is_enabled() {
            return;
        }
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, Bytes::from(bytes)).await,
            Err(e) => self.record_error(
                "encode",
                key.as_str(),
                &CacheError::Serialization(e.to_string()),
            ),
        }
    }

    /// Delete every key matching `pattern`, returning the number removed.
    ///
    /// Unlike reads and writes, invalidation reports backend errors: an
    /// operator clearing the cache needs to know it did not happen.
    pub async fn invalidate(&self, pattern: &str) -> Result<usize, CacheError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(0);
        };

        let keys = backend.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = backend.del(&keys).await?;
        debug!(pattern, removed, "Cache invalidated");
        Ok(removed)
    }

    /// Delete every entry derived from `source`.
    pub async fn invalidate_source(&self, source: &str) -> Result<usize, CacheError> {
        self.invalidate(&CacheKey::source_pattern(source)).await
    }

    /// Backend occupancy, if available.
    pub async fn backend_stats(&self) -> Option<BackendStats> {
        self.backend.as_ref()?.stats().await
    }
}

// =============================================================================
// Tests
// =============================================================================
