//! Processing orchestration.
//!
//! - [`ImageService`] renders single images, thumbnails and metadata behind
//!   the cache layer
//! - [`VolumeAssembler`] stacks slices into volumes and renders MPR planes
//! - [`WorkerPool`] runs all CPU-bound work off the async runtime

pub mod image;
pub mod pool;
pub mod stats;
pub mod volume;

pub use image::{ImageResponse, ImageService};
pub use pool::WorkerPool;
pub use stats::{ProcessingStats, StatsSnapshot};
pub use volume::{
    Orientation, PlaneRender, Volume, VolumeAssembler, VolumeLimits, VolumeSummary,
    DEFAULT_MAX_SLICES,
};
