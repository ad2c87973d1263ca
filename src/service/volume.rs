//! Volume assembly and multi-planar reconstruction.
//!
//! Slices are decoded concurrently on the worker pool and stacked in the
//! order they were requested, never in completion order. A slice that fails
//! to load, or whose dimensions differ from the first loaded slice, is
//! dropped with a warning. The volume fails only when nothing loads or when
//! fewer slices load than the configured completeness threshold requires.

use std::sync::Arc;

use futures::future::join_all;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ImageError, VolumeError};
use crate::pixel::{self, DecodedImage, Polarity, SampleGrid, WindowRequest};
use crate::render::RenderedImage;
use crate::source::ImageSource;

use super::image::ImageService;

/// Default maximum number of slices per volume.
pub const DEFAULT_MAX_SLICES: usize = 1000;

// =============================================================================
// Orientation
// =============================================================================

/// Plane orientation for reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Plane of constant slice index, `[i, :, :]`
    Axial,

    /// Plane of constant row, `[:, i, :]`
    Coronal,

    /// Plane of constant column, `[:, :, i]`
    Sagittal,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
        }
    }

    fn axis(&self) -> Axis {
        match self {
            Orientation::Axial => Axis(0),
            Orientation::Coronal => Axis(1),
            Orientation::Sagittal => Axis(2),
        }
    }
}

// =============================================================================
// Volume
// =============================================================================

/// A stack of decoded slices, indexed `[slice, row, column]`.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Rescaled samples
    pub data: Array3<f32>,

    /// Identifiers of the stacked slices, in stack order
    pub slice_ids: Vec<String>,

    /// Identifiers that were requested but dropped
    pub dropped: Vec<String>,

    /// Number of slices requested
    pub requested: usize,

    /// Polarity of the first loaded slice
    pub polarity: Polarity,
}

/// Serializable description of a volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeSummary {
    pub requested: usize,
    pub loaded: usize,
    pub partial: bool,
    pub depth: usize,
    pub rows: usize,
    pub columns: usize,
    pub dropped: Vec<String>,
}

impl Volume {
    /// `(depth, rows, columns)`
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn loaded(&self) -> usize {
        self.slice_ids.len()
    }

    /// Whether some requested slices are missing.
    pub fn is_partial(&self) -> bool {
        self.loaded() < self.requested
    }

    /// Length of the volume along an orientation's axis.
    pub fn axis_len(&self, orientation: Orientation) -> usize {
        self.data.len_of(orientation.axis())
    }

    /// Extract a plane as a 2D grid.
    ///
    /// Axial planes are `rows x columns`, coronal planes `depth x columns`,
    /// sagittal planes `depth x rows`.
    pub fn plane(&self, orientation: Orientation, index: usize) -> Result<SampleGrid, VolumeError> {
        let len = self.axis_len(orientation);
        if index >= len {
            return Err(VolumeError::PlaneOutOfRange {
                orientation: orientation.as_str(),
                index,
                len,
            });
        }
        Ok(self.data.index_axis(orientation.axis(), index).to_owned())
    }

    pub fn summary(&self) -> VolumeSummary {
        let (depth, rows, columns) = self.dim();
        VolumeSummary {
            requested: self.requested,
            loaded: self.loaded(),
            partial: self.is_partial(),
            depth,
            rows,
            columns,
            dropped: self.dropped.clone(),
        }
    }
}

// =============================================================================
// Plane Render
// =============================================================================

/// An encoded MPR plane.
#[derive(Debug, Clone)]
pub struct PlaneRender {
    pub image: RenderedImage,
    pub orientation: Orientation,
    pub index: usize,
    pub volume: VolumeSummary,
}

// =============================================================================
// Volume Assembler
// =============================================================================

/// Limits applied to volume requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeLimits {
    /// Maximum number of slices per request
    pub max_slices: usize,

    /// Fraction of requested slices that must load, in `[0, 1]`
    pub min_completeness: f64,
}

impl Default for VolumeLimits {
    fn default() -> Self {
        Self {
            max_slices: DEFAULT_MAX_SLICES,
            min_completeness: 0.0,
        }
    }
}

/// Builds volumes from slices served by an [`ImageService`].
pub struct VolumeAssembler<S: ImageSource> {
    images: Arc<ImageService<S>>,
    limits: VolumeLimits,
}

impl<S: ImageSource> VolumeAssembler<S> {
    pub fn new(images: Arc<ImageService<S>>, limits: VolumeLimits) -> Self {
        Self { images, limits }
    }

    pub fn limits(&self) -> &VolumeLimits {
        &self.limits
    }

    /// Decode every slice and stack them in input order.
    ///
    /// # Errors
    ///
    /// - [`VolumeError::EmptyRequest`] / [`VolumeError::TooManySlices`] for
    ///   a request outside the limits
    /// - [`VolumeError::NoSlices`] if no slice loaded
    /// - [`VolumeError::Incomplete`] if fewer slices loaded than
    ///   `min_completeness` requires
    pub async fn build_volume(&self, image_ids: &[String]) -> Result<Volume, VolumeError> {
        let requested = image_ids.len();
        if requested == 0 {
            return Err(VolumeError::EmptyRequest);
        }
        if requested > self.limits.max_slices {
            return Err(VolumeError::TooManySlices {
                requested,
                max: self.limits.max_slices,
            });
        }

        // join_all yields results in input order regardless of completion order
        let results = join_all(image_ids.iter().map(|id| self.images.decode_image(id))).await;

        let mut slices: Vec<DecodedImage> = Vec::with_capacity(requested);
        let mut slice_ids = Vec::with_capacity(requested);
        let mut dropped = Vec::new();

        for (id, result) in image_ids.iter().zip(results) {
            match result {
                Ok(slice) => {
                    if let Some(first) = slices.first() {
                        if first.samples.dim() != slice.samples.dim() {
                            warn!(
                                image_id = %id,
                                expected = ?first.samples.dim(),
                                actual = ?slice.samples.dim(),
                                "Dropping slice with mismatched dimensions"
                            );
                            dropped.push(id.clone());
                            continue;
                        }
                    }
                    slice_ids.push(id.clone());
                    slices.push(slice);
                }
                Err(e) => {
                    log_dropped(id, &e);
                    dropped.push(id.clone());
                }
            }
        }

        let loaded = slices.len();
        if loaded == 0 {
            return Err(VolumeError::NoSlices { requested });
        }

        let completeness = loaded as f64 / requested as f64;
        if completeness < self.limits.min_completeness {
            return Err(VolumeError::Incomplete {
                loaded,
                requested,
                required: self.limits.min_completeness * 100.0,
            });
        }

        let polarity = slices[0].polarity;
        let data = self.stack(slices).await?;

        self.images.stats().record_volume(dropped.len());
        debug!(requested, loaded, "Volume built");

        Ok(Volume {
            data,
            slice_ids,
            dropped,
            requested,
            polarity,
        })
    }

    /// Build a volume and render one reconstructed plane.
    ///
    /// The window request is resolved first, so a non-finite window fails
    /// before any slice is read. Planes are not cached.
    pub async fn render_plane(
        &self,
        image_ids: &[String],
        orientation: Orientation,
        index: usize,
        request: &WindowRequest,
    ) -> Result<PlaneRender, VolumeError> {
        let window = request.resolve()?;
        let volume = self.build_volume(image_ids).await?;

        let len = volume.axis_len(orientation);
        if index >= len {
            return Err(VolumeError::PlaneOutOfRange {
                orientation: orientation.as_str(),
                index,
                len,
            });
        }

        let summary = volume.summary();
        let encoder = self.images.encoder();

        let image = self
            .images
            .pool()
            .run(move || -> Result<RenderedImage, VolumeError> {
                let plane = volume.plane(orientation, index)?;
                let spec = window.to_spec(&plane);
                let grid = pixel::apply(&plane, &spec, volume.polarity);
                Ok(encoder.encode(&grid, spec)?)
            })
            .await??;

        Ok(PlaneRender {
            image,
            orientation,
            index,
            volume: summary,
        })
    }

    async fn stack(&self, slices: Vec<DecodedImage>) -> Result<Array3<f32>, VolumeError> {
        let (rows, columns) = slices[0].samples.dim();
        let depth = slices.len();

        let data = self
            .images
            .pool()
            .run(move || {
                let mut data = Array3::zeros((depth, rows, columns));
                // Every slice has the first slice's dimensions at this point
                for (mut plane, slice) in data.axis_iter_mut(Axis(0)).zip(&slices) {
                    plane.assign(&slice.samples);
                }
                data
            })
            .await?;
        Ok(data)
    }
}

fn log_dropped(image_id: &str, error: &ImageError) {
    warn!(
        image_id,
        stage = error.stage(),
        error = %error,
        "Dropping slice that failed to load"
    );
}

// =============================================================================
// Tests
// =============================================================================
