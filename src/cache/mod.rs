//! Caching for rendered images, thumbnails and metadata.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ CacheLayer                                  │
//! │  - key derivation (SHA-256, namespaced)     │
//! │  - TTL classes (image / thumbnail / meta)   │
//! │  - fail-open: errors become miss / no-op    │
//! └──────────────────────┬──────────────────────┘
//!                        │ GET / SETEX / KEYS / DEL
//!                        ▼
//!              ┌───────────────────┐
//!              │ dyn CacheBackend  │  MemoryBackend (LRU + TTL)
//!              └───────────────────┘
//! ```

pub mod backend;
pub mod layer;

pub use backend::{
    glob_match, BackendStats, CacheBackend, MemoryBackend, DEFAULT_CACHE_CAPACITY,
    DEFAULT_MAX_ENTRIES, DEFAULT_PURGE_INTERVAL,
};
pub use layer::{CacheKey, CacheLayer, Namespace, TtlPolicy, ALL_KEYS_PATTERN, KEY_PREFIX};
