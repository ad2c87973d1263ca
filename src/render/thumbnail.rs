//! Aspect-preserving downsampling for thumbnails.

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array2;

use crate::error::EncodeError;
use crate::pixel::Uint8Grid;

/// Default longest edge of a thumbnail.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

/// Largest accepted thumbnail edge.
pub const MAX_THUMBNAIL_SIZE: u32 = 2048;

/// Compute output dimensions fitting `(width, height)` within `max_size`.
///
/// Never upscales. Each dimension is at least 1.
pub fn fit_within(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width <= max_size && height <= max_size {
        return (width, height);
    }

    let scale = max_size as f64 / width.max(height) as f64;
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_size);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_size);
    (w, h)
}

/// Downsample a grid so its longest edge is at most `max_size`.
///
/// Uses a Lanczos3 filter. Grids already within bounds are returned as-is.
pub fn downsample(grid: &Uint8Grid, max_size: u32) -> Result<Uint8Grid, EncodeError> {
    let (rows, cols) = grid.dim();
    if rows == 0 || cols == 0 || max_size == 0 {
        return Err(EncodeError::EmptyGrid {
            width: cols,
            height: rows,
        });
    }

    let too_large = || EncodeError::TooLarge {
        width: cols,
        height: rows,
    };
    let width = u32::try_from(cols).map_err(|_| too_large())?;
    let height = u32::try_from(rows).map_err(|_| too_large())?;

    let (new_width, new_height) = fit_within(width, height, max_size);
    if (new_width, new_height) == (width, height) {
        return Ok(grid.clone());
    }

    let source = GrayImage::from_raw(width, height, grid.iter().copied().collect())
        .ok_or_else(too_large)?;
    let resized = imageops::resize(&source, new_width, new_height, FilterType::Lanczos3);

    Array2::from_shape_vec(
        (new_height as usize, new_width as usize),
        resized.into_raw(),
    )
    .map_err(|e| EncodeError::Png(e.to_string()))
}
