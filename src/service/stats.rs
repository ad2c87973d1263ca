//! Processing counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters updated by the image and volume services.
///
/// `images_rendered` and `thumbnails_rendered` only move when the full
/// decode/window/encode pipeline runs, never on a cache hit.
/// Hits and misses count image and thumbnail lookups, not metadata.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    images_rendered: AtomicU64,
    thumbnails_rendered: AtomicU64,
    render_micros: AtomicU64,
    volumes_built: AtomicU64,
    slices_dropped: AtomicU64,
}

/// Point-in-time copy of [`ProcessingStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    pub images_rendered: u64,
    pub thumbnails_rendered: u64,
    pub volumes_built: u64,
    pub slices_dropped: u64,

    /// Mean wall time of a full render, in milliseconds
    pub avg_render_ms: f64,

    /// Hits over lookups, 0 when nothing was looked up
    pub cache_hit_ratio: f64,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image(&self, elapsed: Duration) {
        self.images_rendered.fetch_add(1, Ordering::Relaxed);
        self.add_render_time(elapsed);
    }

    pub fn record_thumbnail(&self, elapsed: Duration) {
        self.thumbnails_rendered.fetch_add(1, Ordering::Relaxed);
        self.add_render_time(elapsed);
    }

    pub fn record_volume(&self, dropped: usize) {
        self.volumes_built.fetch_add(1, Ordering::Relaxed);
        self.slices_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    fn add_render_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.render_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn images_rendered(&self) -> u64 {
        self.images_rendered.load(Ordering::Relaxed)
    }

    /// Take a snapshot. `cache_errors` comes from the cache layer.
    pub fn snapshot(&self, cache_errors: u64) -> StatsSnapshot {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let images = self.images_rendered.load(Ordering::Relaxed);
        let thumbnails = self.thumbnails_rendered.load(Ordering::Relaxed);
        let micros = self.render_micros.load(Ordering::Relaxed);

        let renders = images + thumbnails;
        let avg_render_ms = if renders == 0 {
            0.0
        } else {
            micros as f64 / renders as f64 / 1000.0
        };

        let lookups = hits + misses;
        let cache_hit_ratio = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        StatsSnapshot {
            cache_hits: hits,
            cache_misses: misses,
            cache_errors,
            images_rendered: images,
            thumbnails_rendered: thumbnails,
            volumes_built: self.volumes_built.load(Ordering::Relaxed),
            slices_dropped: self.slices_dropped.load(Ordering::Relaxed),
            avg_render_ms,
            cache_hit_ratio,
        }
    }
}
