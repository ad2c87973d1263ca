use thiserror::Error;

/// Errors raised by source storage when fetching the raw bytes of an image.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// No object exists for the identifier
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Error from the storage backend (filesystem, S3, ...)
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors raised while turning a DICOM byte stream into a sample grid.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The byte stream is not a readable DICOM object
    #[error("Malformed DICOM object: {0}")]
    Dicom(String),

    /// Required attribute is missing from the data set
    #[error("Missing required attribute: {0}")]
    MissingAttribute(&'static str),

    /// Attribute is present but its value cannot be used
    #[error("Invalid value for {name}: {message}")]
    InvalidAttribute { name: &'static str, message: String },

    /// The data set carries no Pixel Data element
    #[error("No pixel data in data set")]
    MissingPixelData,

    /// Pixel Data is stored as compressed fragments
    #[error("Encapsulated pixel data is not supported")]
    EncapsulatedPixelData,

    /// Only grayscale images can be windowed
    #[error("Unsupported samples per pixel: {0} (only 1 is supported)")]
    UnsupportedSamplesPerPixel(u16),

    /// Bits Allocated outside 8/16/32
    #[error("Unsupported bits allocated: {0}")]
    UnsupportedBitsAllocated(u16),

    /// Transfer syntax with compressed pixel data
    #[error("Unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    /// Rows or Columns is zero
    #[error("Invalid image dimensions: {rows}x{columns}")]
    InvalidDimensions { rows: u32, columns: u32 },

    /// Pixel Data is shorter than Rows x Columns samples
    #[error("Truncated pixel data: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Errors raised while resolving a window request.
#[derive(Debug, Clone, Error)]
pub enum WindowError {
    /// Width or center is not a finite number
    #[error("Invalid window: width={width}, center={center}")]
    NonFinite { width: f64, center: f64 },
}

/// Errors raised by the image encoder.
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    /// The intensity grid has a zero dimension
    #[error("Cannot encode an empty grid ({width}x{height})")]
    EmptyGrid { width: usize, height: usize },

    /// Grid dimensions do not fit the container format
    #[error("Grid too large to encode: {width}x{height}")]
    TooLarge { width: usize, height: usize },

    /// Error from the PNG encoder
    #[error("PNG encoding failed: {0}")]
    Png(String),
}

/// Errors from the cache backend.
///
/// These never reach a caller of the image pipeline: the cache layer logs
/// them and degrades to a miss or a skipped write.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The key-value service failed or is unreachable
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// A cached payload could not be serialized or deserialized
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Errors from the CPU worker pool.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The task was dropped before producing a result (panic or shutdown)
    #[error("Worker task aborted")]
    TaskAborted,

    /// The pool could not be created
    #[error("Failed to build worker pool: {0}")]
    Build(String),
}

/// Errors returned by the single-image pipeline.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// The image identifier does not resolve to a stored object (HTTP 404)
    #[error("Image not found: {image_id}")]
    SourceNotFound { image_id: String },

    /// Source storage failed while fetching the image
    #[error("Failed to read image {image_id}: {source}")]
    Source {
        image_id: String,
        #[source]
        source: SourceError,
    },

    /// The stored object could not be decoded (HTTP 422)
    #[error("Failed to decode image {image_id}: {source}")]
    Decode {
        image_id: String,
        #[source]
        source: DecodeError,
    },

    /// The windowed grid could not be encoded (HTTP 422)
    #[error("Failed to encode image {image_id}: {source}")]
    Encode {
        image_id: String,
        #[source]
        source: EncodeError,
    },

    /// The window request cannot be resolved (HTTP 400)
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Thumbnail size outside the accepted range (HTTP 400)
    #[error("Invalid thumbnail size: {size}")]
    InvalidThumbnailSize { size: u32 },

    /// The worker pool lost the task
    #[error("Worker error: {0}")]
    Worker(#[from] PoolError),

    /// Cache invalidation failed. Reads and writes never produce this.
    #[error("Cache unavailable: {0}")]
    Cache(#[from] CacheError),
}

impl ImageError {
    /// Map a source-storage error for the given image.
    pub fn from_source(image_id: &str, err: SourceError) -> Self {
        match err {
            SourceError::NotFound(_) => ImageError::SourceNotFound {
                image_id: image_id.to_string(),
            },
            other => ImageError::Source {
                image_id: image_id.to_string(),
                source: other,
            },
        }
    }

    /// Pipeline stage the error belongs to, used as a log field.
    pub fn stage(&self) -> &'static str {
        match self {
            ImageError::SourceNotFound { .. } | ImageError::Source { .. } => "source",
            ImageError::Decode { .. } => "decode",
            ImageError::Encode { .. } => "encode",
            ImageError::Window(_) | ImageError::InvalidThumbnailSize { .. } => "request",
            ImageError::Worker(_) => "worker",
            ImageError::Cache(_) => "cache",
        }
    }
}

/// Errors returned by volume assembly and MPR rendering.
#[derive(Debug, Clone, Error)]
pub enum VolumeError {
    /// No slice identifiers were supplied
    #[error("No slices requested")]
    EmptyRequest,

    /// More slices requested than the configured limit
    #[error("Too many slices: {requested} requested, at most {max} allowed")]
    TooManySlices { requested: usize, max: usize },

    /// Every slice failed to load
    #[error("No slices could be loaded ({requested} requested)")]
    NoSlices { requested: usize },

    /// Fewer slices loaded than the completeness threshold requires
    #[error("Only {loaded} of {requested} slices loaded (at least {required:.0}% required)")]
    Incomplete {
        loaded: usize,
        requested: usize,
        required: f64,
    },

    /// Plane index is outside the volume along the requested axis
    #[error("Plane index {index} out of range for {orientation} axis of length {len}")]
    PlaneOutOfRange {
        orientation: &'static str,
        index: usize,
        len: usize,
    },

    /// The window request cannot be resolved
    #[error(transparent)]
    Window(#[from] WindowError),

    /// The reconstructed plane could not be encoded
    #[error("Failed to encode plane: {0}")]
    Encode(#[from] EncodeError),

    /// The worker pool lost the task
    #[error("Worker error: {0}")]
    Worker(#[from] PoolError),
}
