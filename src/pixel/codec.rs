//! DICOM pixel decoding.
//!
//! Turns the bytes of a DICOM file (or a bare data set with a file meta
//! group) into a floating-point sample grid in rescaled units:
//!
//! ```text
//! value = stored * RescaleSlope + RescaleIntercept
//! ```
//!
//! Only native (uncompressed) grayscale pixel data is decoded. For
//! multi-frame objects the first frame is used.

use byteorder::{ByteOrder, NativeEndian};
use dicom_core::{DicomValue, Tag};
use dicom_dictionary_std::tags;
use dicom_object::file::ReadPreamble;
use dicom_object::{DefaultDicomObject, OpenFileOptions};
use ndarray::Array2;

use crate::error::DecodeError;

use super::SampleGrid;

/// Offset of the `DICM` magic code in a file with a preamble.
const PREAMBLE_LEN: usize = 128;

/// Transfer syntaxes whose Pixel Data is stored uncompressed.
const NATIVE_TRANSFER_SYNTAXES: &[&str] = &[
    "1.2.840.10008.1.2",      // Implicit VR Little Endian
    "1.2.840.10008.1.2.1",    // Explicit VR Little Endian
    "1.2.840.10008.1.2.1.99", // Deflated Explicit VR Little Endian
    "1.2.840.10008.1.2.2",    // Explicit VR Big Endian
];

// =============================================================================
// Decoded Image
// =============================================================================

/// Display polarity derived from the photometric interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// MONOCHROME2: higher values render brighter
    #[default]
    Normal,

    /// MONOCHROME1: higher values render darker
    Inverted,
}

impl Polarity {
    /// Derive polarity from a Photometric Interpretation value.
    pub fn from_photometric(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("MONOCHROME1") {
            Polarity::Inverted
        } else {
            Polarity::Normal
        }
    }

    pub fn is_inverted(self) -> bool {
        self == Polarity::Inverted
    }
}

/// Window stored in the data set by the acquiring modality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddedWindow {
    pub width: f64,
    pub center: f64,
}

/// A decoded single-frame image.
///
/// `samples` is never mutated after decoding; windowing produces new grids.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Rescaled samples, shape `(rows, columns)`
    pub samples: SampleGrid,

    /// Polarity of the source photometric interpretation
    pub polarity: Polarity,

    /// Bits Allocated per stored sample (8, 16 or 32)
    pub bits_allocated: u16,

    /// Bits Stored per sample
    pub bits_stored: u16,

    /// Whether stored samples are two's complement
    pub signed: bool,

    /// Rescale slope applied to stored values
    pub rescale_slope: f64,

    /// Rescale intercept applied to stored values
    pub rescale_intercept: f64,

    /// Window Center/Width from the data set, if present
    pub embedded_window: Option<EmbeddedWindow>,
}

impl DecodedImage {
    /// Rows in the grid.
    pub fn rows(&self) -> usize {
        self.samples.nrows()
    }

    /// Columns in the grid.
    pub fn columns(&self) -> usize {
        self.samples.ncols()
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Check whether the stream starts with the 128-byte preamble and `DICM`.
fn has_preamble(bytes: &[u8]) -> bool {
    bytes.len() >= PREAMBLE_LEN + 4 && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] == b"DICM"
}

/// Parse a DICOM object from memory.
///
/// With `header_only`, parsing stops before Pixel Data.
pub(crate) fn open(bytes: &[u8], header_only: bool) -> Result<DefaultDicomObject, DecodeError> {
    let preamble = if has_preamble(bytes) {
        ReadPreamble::Always
    } else {
        ReadPreamble::Never
    };

    let mut options = OpenFileOptions::new().read_preamble(preamble);
    if header_only {
        options = options.read_until(tags::PIXEL_DATA);
    }

    options
        .from_reader(bytes)
        .map_err(|e| DecodeError::Dicom(e.to_string()))
}

pub(crate) fn required_u16(
    obj: &DefaultDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<u16, DecodeError> {
    obj.element(tag)
        .map_err(|_| DecodeError::MissingAttribute(name))?
        .to_int::<u16>()
        .map_err(|e| DecodeError::InvalidAttribute {
            name,
            message: e.to_string(),
        })
}

fn optional_u16(
    obj: &DefaultDicomObject,
    tag: Tag,
    name: &'static str,
) -> Result<Option<u16>, DecodeError> {
    match obj.element(tag) {
        Ok(elem) => elem
            .to_int::<u16>()
            .map(Some)
            .map_err(|e| DecodeError::InvalidAttribute {
                name,
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// First value of a numeric attribute, `None` when absent or unparsable.
pub(crate) fn optional_f64(obj: &DefaultDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag)
        .ok()?
        .to_float64()
        .ok()
        .filter(|v| v.is_finite())
}

/// Trimmed string value, `None` when absent or empty.
pub(crate) fn optional_str(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
    let value = obj.element(tag).ok()?.to_str().ok()?;
    let trimmed = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn embedded_window(obj: &DefaultDicomObject) -> Option<EmbeddedWindow> {
    let center = optional_f64(obj, tags::WINDOW_CENTER)?;
    let width = optional_f64(obj, tags::WINDOW_WIDTH)?;
    Some(EmbeddedWindow { width, center })
}

// =============================================================================
// Decode
// =============================================================================

/// Decode a DICOM byte stream into a rescaled sample grid.
///
/// # Errors
///
/// Returns a [`DecodeError`] when the stream is not a readable DICOM object,
/// lacks pixel data or a required attribute, uses compressed pixel data, or
/// holds fewer samples than `Rows x Columns`.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
    let obj = open(bytes, false)?;

    let ts = obj.meta().transfer_syntax().trim_end_matches('\0');
    if !NATIVE_TRANSFER_SYNTAXES.contains(&ts) {
        return Err(DecodeError::UnsupportedTransferSyntax(ts.to_string()));
    }

    let samples_per_pixel = optional_u16(&obj, tags::SAMPLES_PER_PIXEL, "SamplesPerPixel")?
        .unwrap_or(1);
    if samples_per_pixel != 1 {
        return Err(DecodeError::UnsupportedSamplesPerPixel(samples_per_pixel));
    }

    let rows = required_u16(&obj, tags::ROWS, "Rows")? as usize;
    let columns = required_u16(&obj, tags::COLUMNS, "Columns")? as usize;
    if rows == 0 || columns == 0 {
        return Err(DecodeError::InvalidDimensions {
            rows: rows as u32,
            columns: columns as u32,
        });
    }

    let bits_allocated = required_u16(&obj, tags::BITS_ALLOCATED, "BitsAllocated")?;
    if !matches!(bits_allocated, 8 | 16 | 32) {
        return Err(DecodeError::UnsupportedBitsAllocated(bits_allocated));
    }

    let bits_stored =
        optional_u16(&obj, tags::BITS_STORED, "BitsStored")?.unwrap_or(bits_allocated);
    if bits_stored == 0 || bits_stored > bits_allocated {
        return Err(DecodeError::InvalidAttribute {
            name: "BitsStored",
            message: format!("{} with {} bits allocated", bits_stored, bits_allocated),
        });
    }

    let signed = optional_u16(&obj, tags::PIXEL_REPRESENTATION, "PixelRepresentation")?
        .unwrap_or(0)
        == 1;

    let rescale_slope = optional_f64(&obj, tags::RESCALE_SLOPE).unwrap_or(1.0);
    let rescale_intercept = optional_f64(&obj, tags::RESCALE_INTERCEPT).unwrap_or(0.0);

    let polarity = optional_str(&obj, tags::PHOTOMETRIC_INTERPRETATION)
        .map(|p| Polarity::from_photometric(&p))
        .unwrap_or_default();

    let pixel_data = obj
        .element(tags::PIXEL_DATA)
        .map_err(|_| DecodeError::MissingPixelData)?;
    if matches!(pixel_data.value(), DicomValue::PixelSequence { .. }) {
        return Err(DecodeError::EncapsulatedPixelData);
    }
    let data = pixel_data
        .to_bytes()
        .map_err(|e| DecodeError::Dicom(e.to_string()))?;

    let bytes_per_sample = bits_allocated as usize / 8;
    let expected = rows * columns * bytes_per_sample;
    if data.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: data.len(),
        });
    }

    let frame = &data[..expected];
    let unpack = StoredValue::new(bits_stored, signed);
    let rescale = |raw: u32| unpack.rescale(raw, rescale_slope, rescale_intercept);
    let values: Vec<f32> = match bits_allocated {
        8 => frame.iter().map(|&b| rescale(b as u32)).collect(),
        16 => frame
            .chunks_exact(2)
            .map(|c| rescale(NativeEndian::read_u16(c) as u32))
            .collect(),
        _ => frame
            .chunks_exact(4)
            .map(|c| rescale(NativeEndian::read_u32(c)))
            .collect(),
    };

    let samples = Array2::from_shape_vec((rows, columns), values).map_err(|_| {
        DecodeError::InvalidDimensions {
            rows: rows as u32,
            columns: columns as u32,
        }
    })?;

    Ok(DecodedImage {
        samples,
        polarity,
        bits_allocated,
        bits_stored,
        signed,
        rescale_slope,
        rescale_intercept,
        embedded_window: embedded_window(&obj),
    })
}

/// Masks stored bits and sign-extends two's complement values.
#[derive(Debug, Clone, Copy)]
struct StoredValue {
    mask: u64,
    sign_bit: u64,
    signed: bool,
}

impl StoredValue {
    fn new(bits_stored: u16, signed: bool) -> Self {
        let bits = bits_stored as u32;
        Self {
            mask: (1u64 << bits) - 1,
            sign_bit: 1u64 << (bits - 1),
            signed,
        }
    }

    fn value(self, raw: u32) -> i64 {
        let v = raw as u64 & self.mask;
        if self.signed && v & self.sign_bit != 0 {
            v as i64 - (self.mask as i64 + 1)
        } else {
            v as i64
        }
    }

    fn rescale(self, raw: u32, slope: f64, intercept: f64) -> f32 {
        (self.value(raw) as f64 * slope + intercept) as f32
    }
}

// =============================================================================
// Tests
// =============================================================================
