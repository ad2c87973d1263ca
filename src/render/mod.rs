//! Image encoding: PNG containers, data URIs and thumbnails.

pub mod encoder;
pub mod thumbnail;

pub use encoder::{PngImageEncoder, RenderedImage, PNG_MIME_TYPE};
pub use thumbnail::{downsample, fit_within, DEFAULT_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE};
