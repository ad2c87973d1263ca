//! Key-value backends for the cache layer.
//!
//! The [`CacheBackend`] trait mirrors the handful of commands the cache layer
//! needs from an external key-value service: `GET`, `SETEX`, `KEYS` and
//! `DEL`. [`MemoryBackend`] is an in-process implementation with LRU eviction
//! bounded by total payload size, and per-entry TTL.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::CacheError;

/// Default memory backend capacity: 256MB
pub const DEFAULT_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// How often the background task drops expired entries
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// Backend Trait
// =============================================================================

/// Occupancy figures reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    /// Number of stored entries (may include expired ones not yet purged)
    pub entries: usize,

    /// Total payload bytes
    pub size_bytes: usize,

    /// Capacity in bytes
    pub capacity_bytes: usize,
}

/// A key-value store with expiring binary values.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// List keys matching a glob pattern (`*` and `?` wildcards).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<usize, CacheError>;

    /// Occupancy, if the backend tracks it.
    async fn stats(&self) -> Option<BackendStats> {
        None
    }
}

// =============================================================================
// Memory Backend
// =============================================================================

/// A stored value with its expiry information.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

struct MemoryState {
    entries: LruCache<String, CacheEntry>,
    size: usize,
}

impl MemoryState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.size = self.size.saturating_sub(entry.value.len());
        Some(entry)
    }
}

/// In-process LRU backend with size-based capacity and TTL.
///
/// # Example
///
/// ```
/// use dicom_imaging::cache::{CacheBackend, MemoryBackend};
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let backend = MemoryBackend::new();
///     let value = Bytes::from_static(b"\x89PNG");
///
///     backend
///         .set_ex("dicom:processed:abc", value.clone(), Duration::from_secs(60))
///         .await
///         .unwrap();
///
///     assert_eq!(backend.get("dicom:processed:abc").await.unwrap(), Some(value));
/// }
/// ```
pub struct MemoryBackend {
    state: RwLock<MemoryState>,

    /// Maximum total size in bytes
    max_size: usize,
}

impl MemoryBackend {
    /// Create a backend with default capacity (256MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a backend with the specified capacity in bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a backend with specified capacity and maximum entries.
    ///
    /// A `max_entries` of zero is treated as one.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: RwLock::new(MemoryState {
                entries: LruCache::new(max_entries),
                size: 0,
            }),
            max_size,
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Total payload bytes.
    pub async fn size(&self) -> usize {
        self.state.read().await.size
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Drop every expired entry.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    /// Purge expired entries every `period` until the returned task is aborted.
    pub fn spawn_purge_task(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = backend.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "Purged expired cache entries");
                }
            }
        })
    }

    /// Remove everything.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.size = 0;
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut state = self.state.write().await;

        match state.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(Instant::now()) => {
                return Ok(Some(entry.value.clone()))
            }
            Some(_) => {}
        }

        // Expired, drop it on access
        state.remove(key);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let data_size = value.len();
        let mut state = self.state.write().await;

        // If key exists, subtract old size first
        state.remove(key);

        // A single value larger than the whole cache is not stored
        if data_size > self.max_size {
            return Ok(());
        }

        if let Some((_, evicted)) = state.entries.push(key.to_string(), CacheEntry::new(value, ttl)) {
            // Entry-count bound reached, LRU entry was pushed out
            state.size = state.size.saturating_sub(evicted.value.len());
        }
        state.size += data_size;

        // Evict entries until we're under capacity
        while state.size > self.max_size {
            match state.entries.pop_lru() {
                Some((_, evicted)) => {
                    state.size = state.size.saturating_sub(evicted.value.len());
                }
                None => break,
            }
        }

        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut state = self.state.write().await;
        Ok(keys.iter().filter(|key| state.remove(key).is_some()).count())
    }

    async fn stats(&self) -> Option<BackendStats> {
        let state = self.state.read().await;
        Some(BackendStats {
            entries: state.entries.len(),
            size_bytes: state.size,
            capacity_bytes: self.max_size,
        })
    }
}

// =============================================================================
// Glob Matching
// =============================================================================

/// Match `text` against a pattern where `*` matches any run of characters
/// and `?` matches exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            // Let the last star absorb one more character
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

// =============================================================================
// Tests
// =============================================================================
