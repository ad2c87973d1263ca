//! Filesystem-backed image source.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::SourceError;

use super::{validate_image_id, ImageSource, SourceRef};

/// Extension tried when an identifier does not name a file directly.
pub const DICOM_EXTENSION: &str = "dcm";

/// Serves DICOM files from a single directory.
///
/// The identifier `1` resolves to `<root>/1`, or `<root>/1.dcm` when the
/// former does not exist.
#[derive(Debug, Clone)]
pub struct LocalImageSource {
    root: PathBuf,
}

impl LocalImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn find_file(&self, image_id: &str) -> Result<Option<PathBuf>, SourceError> {
        let candidates = [
            self.root.join(image_id),
            self.root.join(format!("{}.{}", image_id, DICOM_EXTENSION)),
        ];

        for candidate in candidates {
            match tokio::fs::metadata(&candidate).await {
                Ok(meta) if meta.is_file() => {
                    let canonical = tokio::fs::canonicalize(&candidate)
                        .await
                        .map_err(|e| SourceError::Storage(e.to_string()))?;
                    return Ok(Some(canonical));
                }
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(SourceError::Storage(e.to_string())),
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl ImageSource for LocalImageSource {
    async fn resolve(&self, image_id: &str) -> Result<SourceRef, SourceError> {
        validate_image_id(image_id)?;

        let path = self
            .find_file(image_id)
            .await?
            .ok_or_else(|| SourceError::NotFound(image_id.to_string()))?;

        debug!(image_id, path = %path.display(), "Resolved local image");

        Ok(SourceRef {
            image_id: image_id.to_string(),
            key: path.to_string_lossy().into_owned(),
            identity: format!("file://{}", path.display()),
        })
    }

    async fn read_bytes(&self, source: &SourceRef) -> Result<Bytes, SourceError> {
        tokio::fs::read(&source.key)
            .await
            .map(Bytes::from)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SourceError::NotFound(source.image_id.clone()),
                _ => SourceError::Storage(e.to_string()),
            })
    }
}
