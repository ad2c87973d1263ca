//! PNG encoder for windowed grayscale grids.
//!
//! # Determinism
//!
//! Compression level and filter are fixed and no ancillary chunks (time,
//! text) are written, so identical grids always produce identical bytes.
//! Cached entries rely on this: a recomputed image is indistinguishable from
//! the cached one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};

use crate::error::EncodeError;
use crate::pixel::{Uint8Grid, WindowSpec};

/// MIME type of encoded images.
pub const PNG_MIME_TYPE: &str = "image/png";

// =============================================================================
// Rendered Image
// =============================================================================

/// An encoded image together with the window that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedImage {
    /// Encoded PNG bytes
    #[serde(with = "base64_bytes")]
    pub data: Bytes,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// MIME type of `data`
    pub encoding: String,

    /// The window applied before encoding
    pub window: WindowSpec,
}

impl RenderedImage {
    /// Wrap the encoded bytes as a `data:` URI.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.encoding, STANDARD.encode(&self.data))
    }
}

/// Serde adapter storing `Bytes` as a base64 string.
mod base64_bytes {
    use super::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PNG Encoder
// =============================================================================

/// Lossless 8-bit grayscale PNG encoder.
#[derive(Debug, Clone, Copy)]
pub struct PngImageEncoder {
    compression: CompressionType,
}

impl Default for PngImageEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PngImageEncoder {
    pub fn new() -> Self {
        Self {
            compression: CompressionType::Default,
        }
    }

    /// Encoder trading size for speed.
    pub fn fast() -> Self {
        Self {
            compression: CompressionType::Fast,
        }
    }

    /// Encode a grid as PNG.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::EmptyGrid`] for a grid with a zero dimension.
    pub fn encode(&self, grid: &Uint8Grid, window: WindowSpec) -> Result<RenderedImage, EncodeError> {
        let (rows, cols) = grid.dim();
        if rows == 0 || cols == 0 {
            return Err(EncodeError::EmptyGrid {
                width: cols,
                height: rows,
            });
        }

        let (width, height) = match (u32::try_from(cols), u32::try_from(rows)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(EncodeError::TooLarge {
                    width: cols,
                    height: rows,
                })
            }
        };

        // Row-major copy regardless of the grid's memory layout
        let pixels: Vec<u8> = grid.iter().copied().collect();

        let mut output = Vec::new();
        PngEncoder::new_with_quality(&mut output, self.compression, FilterType::Adaptive)
            .write_image(&pixels, width, height, ExtendedColorType::L8)
            .map_err(|e| EncodeError::Png(e.to_string()))?;

        Ok(RenderedImage {
            data: Bytes::from(output),
            width,
            height,
            encoding: PNG_MIME_TYPE.to_string(),
            window,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
