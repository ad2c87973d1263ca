//! Pixel pipeline: DICOM decoding and window/level.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   SampleGrid    ┌──────────────┐   Uint8Grid
//! │ codec        │ ──────────────► │ window       │ ─────────────► render
//! │ (DICOM, f32) │   + polarity    │ (clip, 0-255)│
//! └──────────────┘                 └──────────────┘
//!                                         ▲
//!                                   presets (table)
//! ```

pub mod codec;
pub mod metadata;
pub mod presets;
pub mod window;


use ndarray::Array2;

/// Rescaled samples, indexed `[row, column]`.
pub type SampleGrid = Array2<f32>;

/// 8-bit display intensities, indexed `[row, column]`.
pub type Uint8Grid = Array2<u8>;

pub use codec::{decode, DecodedImage, EmbeddedWindow, Polarity};
pub use metadata::{read_metadata, ImageMetadata};
pub use presets::{Preset, PRESETS};
pub use window::{
    apply, auto_window, ResolvedWindow, WindowMode, WindowRequest, WindowSource, WindowSpec,
};
