//! Window/level transform.
//!
//! Maps a rescaled sample grid onto 8-bit display intensities:
//!
//! ```text
//! min = center - width / 2
//! max = center + width / 2
//! out = (clamp(v, min, max) - min) / (max - min) * 255
//! ```
//!
//! A request is resolved in two steps. [`WindowRequest::resolve`] merges
//! explicit values with a named preset, field by field. If width or center
//! is still missing after the merge, the window is derived from the 1st and
//! 99th percentile of the decoded grid ([`auto_window`]).
//!
//! Inverted polarity (MONOCHROME1) and the explicit `invert` flag are both
//! applied as `255 - v`, polarity first. Applying both cancels out.

use ndarray::Array2;
use rayon::slice::ParallelSliceMut;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WindowError;

use super::codec::Polarity;
use super::presets;
use super::{SampleGrid, Uint8Grid};

/// Lower percentile used by the auto window.
pub const AUTO_LOW_PERCENTILE: f64 = 1.0;

/// Upper percentile used by the auto window.
pub const AUTO_HIGH_PERCENTILE: f64 = 99.0;

// =============================================================================
// Request
// =============================================================================

/// Window parameters as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowRequest {
    /// Explicit window width
    pub width: Option<f64>,

    /// Explicit window center (level)
    pub center: Option<f64>,

    /// Named preset supplying any missing field
    pub preset: Option<String>,

    /// Invert the output after polarity correction
    pub invert: bool,
}

impl WindowRequest {
    /// A request with no parameters: the auto window applies.
    pub fn auto() -> Self {
        Self::default()
    }

    /// A request with explicit width and center.
    pub fn manual(width: f64, center: f64) -> Self {
        Self {
            width: Some(width),
            center: Some(center),
            ..Self::default()
        }
    }

    /// A request for a named preset.
    pub fn preset(name: impl Into<String>) -> Self {
        Self {
            preset: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_center(mut self, center: f64) -> Self {
        self.center = Some(center);
        self
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Merge explicit values with the preset table.
    ///
    /// Explicit values override preset values field by field, so
    /// `preset=lung` with an explicit center of -500 yields (1500, -500).
    /// A preset name that is not in the table is ignored, as if absent.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::NonFinite`] for NaN or infinite values.
    pub fn resolve(&self) -> Result<ResolvedWindow, WindowError> {
        for value in [self.width, self.center].into_iter().flatten() {
            if !value.is_finite() {
                return Err(WindowError::NonFinite {
                    width: self.width.unwrap_or(f64::NAN),
                    center: self.center.unwrap_or(f64::NAN),
                });
            }
        }

        let preset = self.preset.as_deref().and_then(|name| {
            let found = presets::lookup(name);
            if found.is_none() {
                warn!(preset = name, "Ignoring unknown preset");
            }
            found
        });

        let width = self.width.or(preset.map(|p| p.width));
        let center = self.center.or(preset.map(|p| p.center));

        let mode = match (width, center) {
            (Some(width), Some(center)) => {
                let preset_used = self.width.is_none() || self.center.is_none();
                let source = match preset {
                    Some(p) if preset_used => WindowSource::Preset(p.name.to_string()),
                    _ => WindowSource::Manual,
                };
                WindowMode::Fixed {
                    width,
                    center,
                    source,
                }
            }
            _ => WindowMode::Auto,
        };

        Ok(ResolvedWindow {
            mode,
            preset: preset.map(|p| p.name),
            invert: self.invert,
        })
    }
}

// =============================================================================
// Resolved Window
// =============================================================================

/// How the applied window was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    Manual,
    Preset(String),
    Auto,
}

impl WindowSource {
    /// Short label used in API responses.
    pub fn label(&self) -> &'static str {
        match self {
            WindowSource::Manual => "manual",
            WindowSource::Preset(_) => "preset",
            WindowSource::Auto => "auto",
        }
    }
}

/// Window mode after preset resolution, before looking at pixel data.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowMode {
    /// Width and center are known
    Fixed {
        width: f64,
        center: f64,
        source: WindowSource,
    },

    /// Derive width and center from the grid's percentiles
    Auto,
}

/// A window request with presets resolved.
///
/// This is what the cache key is derived from: it depends only on request
/// parameters, never on pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWindow {
    pub mode: WindowMode,

    /// Canonical name of the requested preset, if any
    pub preset: Option<&'static str>,

    pub invert: bool,
}

impl ResolvedWindow {
    /// The auto window without inversion.
    pub fn auto() -> Self {
        Self {
            mode: WindowMode::Auto,
            preset: None,
            invert: false,
        }
    }

    /// Produce the concrete window for a decoded grid.
    pub fn to_spec(&self, grid: &SampleGrid) -> WindowSpec {
        match &self.mode {
            WindowMode::Fixed {
                width,
                center,
                source,
            } => WindowSpec {
                width: *width,
                center: *center,
                invert: self.invert,
                source: source.clone(),
            },
            WindowMode::Auto => auto_window(grid).with_invert(self.invert),
        }
    }
}

// =============================================================================
// Window Spec
// =============================================================================

/// The concrete window applied to a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub width: f64,
    pub center: f64,
    pub invert: bool,
    pub source: WindowSource,
}

impl WindowSpec {
    pub fn new(width: f64, center: f64) -> Self {
        Self {
            width,
            center,
            invert: false,
            source: WindowSource::Manual,
        }
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Lower and upper bound of the window.
    pub fn bounds(&self) -> (f64, f64) {
        let half = self.width / 2.0;
        (self.center - half, self.center + half)
    }

    /// Whether the window collapses to a point (or is not a number).
    pub fn is_degenerate(&self) -> bool {
        let (min, max) = self.bounds();
        !(max > min)
    }
}

// =============================================================================
// Transform
// =============================================================================

/// Apply a window to a sample grid.
///
/// Output values always lie in `[0, 255]`. A degenerate window yields an
/// all-zero grid; inversion is not applied to it.
pub fn apply(grid: &SampleGrid, spec: &WindowSpec, polarity: Polarity) -> Uint8Grid {
    if spec.is_degenerate() {
        return Array2::zeros(grid.raw_dim());
    }

    let (min, max) = spec.bounds();
    let range = max - min;
    let flip_polarity = polarity.is_inverted();
    let flip_explicit = spec.invert;

    grid.mapv(|v| {
        let clipped = (v as f64).clamp(min, max);
        // NaN samples saturate to 0
        let mut out = ((clipped - min) / range * 255.0) as u8;
        if flip_polarity {
            out = 255 - out;
        }
        if flip_explicit {
            out = 255 - out;
        }
        out
    })
}

/// Derive a window from the 1st and 99th percentile of the grid.
///
/// NaN samples are ignored. An empty (or all-NaN) grid yields a zero-width
/// window, which renders as all zeros.
pub fn auto_window(grid: &SampleGrid) -> WindowSpec {
    let mut values: Vec<f32> = grid.iter().copied().filter(|v| !v.is_nan()).collect();
    values.par_sort_unstable_by(|a, b| a.total_cmp(b));

    let p1 = percentile(&values, AUTO_LOW_PERCENTILE);
    let p99 = percentile(&values, AUTO_HIGH_PERCENTILE);

    WindowSpec {
        width: p99 - p1,
        center: (p1 + p99) / 2.0,
        invert: false,
        source: WindowSource::Auto,
    }
}

/// Percentile of sorted values with linear interpolation between ranks.
fn percentile(sorted: &[f32], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0] as f64,
        n => {
            let rank = pct / 100.0 * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let lo_v = sorted[lo] as f64;
            let hi_v = sorted[hi] as f64;
            lo_v + (hi_v - lo_v) * (rank - lo as f64)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
