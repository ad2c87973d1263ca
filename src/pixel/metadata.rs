//! Descriptive attributes read from the DICOM header.
//!
//! Parsing stops before Pixel Data, so this is cheap even for large
//! multi-frame objects.

use dicom_dictionary_std::tags;
use dicom_object::DefaultDicomObject;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

use super::codec::{embedded_window, open, optional_f64, optional_str};

/// Header attributes returned alongside rendered images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub modality: Option<String>,
    pub study_description: Option<String>,
    pub series_description: Option<String>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
    pub instance_number: Option<i32>,
    pub slice_thickness: Option<f64>,
    pub pixel_spacing: Option<Vec<f64>>,
    pub photometric_interpretation: Option<String>,
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,
    pub rescale_slope: Option<f64>,
    pub rescale_intercept: Option<f64>,
    pub transfer_syntax: Option<String>,
}

/// Read header attributes from a DICOM byte stream.
pub fn read_metadata(bytes: &[u8]) -> Result<ImageMetadata, DecodeError> {
    let obj = open(bytes, true)?;
    Ok(extract(&obj))
}

fn extract(obj: &DefaultDicomObject) -> ImageMetadata {
    let window = embedded_window(obj);
    let transfer_syntax = obj.meta().transfer_syntax().trim_end_matches('\0');

    ImageMetadata {
        patient_id: optional_str(obj, tags::PATIENT_ID),
        patient_name: optional_str(obj, tags::PATIENT_NAME),
        study_date: optional_str(obj, tags::STUDY_DATE),
        study_time: optional_str(obj, tags::STUDY_TIME),
        modality: optional_str(obj, tags::MODALITY),
        study_description: optional_str(obj, tags::STUDY_DESCRIPTION),
        series_description: optional_str(obj, tags::SERIES_DESCRIPTION),
        rows: obj.element(tags::ROWS).ok().and_then(|e| e.to_int::<u32>().ok()),
        columns: obj
            .element(tags::COLUMNS)
            .ok()
            .and_then(|e| e.to_int::<u32>().ok()),
        instance_number: obj
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|e| e.to_int::<i32>().ok()),
        slice_thickness: optional_f64(obj, tags::SLICE_THICKNESS),
        pixel_spacing: obj
            .element(tags::PIXEL_SPACING)
            .ok()
            .and_then(|e| e.to_multi_float64().ok()),
        photometric_interpretation: optional_str(obj, tags::PHOTOMETRIC_INTERPRETATION),
        window_center: window.map(|w| w.center),
        window_width: window.map(|w| w.width),
        rescale_slope: optional_f64(obj, tags::RESCALE_SLOPE),
        rescale_intercept: optional_f64(obj, tags::RESCALE_INTERCEPT),
        transfer_syntax: Some(transfer_syntax.to_string()).filter(|ts| !ts.is_empty()),
    }
}

// =============================================================================
// Tests
// =============================================================================
