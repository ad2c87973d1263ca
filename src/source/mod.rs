//! Source storage for DICOM objects.
//!
//! An [`ImageSource`] turns a logical image identifier into a [`SourceRef`]
//! and reads the raw bytes behind it. The reference carries a stable
//! identity string that the cache layer uses as the source component of
//! its keys, so two identifiers pointing at the same stored object share
//! cache entries and two different objects never do.

mod local;
mod s3;

pub use local::{LocalImageSource, DICOM_EXTENSION};
pub use s3::{create_s3_client, S3ImageSource};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SourceError;

/// A resolved image location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// Identifier the caller asked for
    pub image_id: String,

    /// Backend-specific location (filesystem path or object key)
    pub key: String,

    /// Stable identity of the stored object, e.g. `file:///data/1.dcm`
    pub identity: String,
}

/// Trait for retrieving stored DICOM objects.
///
/// Implementations must be cheap to share across tasks.
#[async_trait]
pub trait ImageSource: Send + Sync + 'static {
    /// Map an image identifier to a stored object.
    ///
    /// Returns [`SourceError::NotFound`] if no object exists.
    async fn resolve(&self, image_id: &str) -> Result<SourceRef, SourceError>;

    /// Read the full object.
    async fn read_bytes(&self, source: &SourceRef) -> Result<Bytes, SourceError>;
}

/// Check that an identifier is a single, non-special path component.
///
/// Identifiers are never allowed to address anything outside the configured
/// root or prefix.
pub(crate) fn validate_image_id(image_id: &str) -> Result<(), SourceError> {
    let invalid = image_id.is_empty()
        || image_id == "."
        || image_id == ".."
        || image_id.contains(['/', '\\', '\0']);

    if invalid {
        return Err(SourceError::NotFound(image_id.to_string()));
    }
    Ok(())
}
