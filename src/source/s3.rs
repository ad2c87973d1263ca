//! S3-backed image source.
//!
//! Objects are fetched whole with a single `GetObject`; DICOM files for
//! single slices are small enough that range requests buy nothing.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use crate::error::SourceError;

use super::{validate_image_id, ImageSource, SourceRef};

/// S3-backed implementation of [`ImageSource`].
///
/// The image identifier, joined to the optional prefix, is the object key.
///
/// # Example
///
/// ```ignore
/// use dicom_imaging::source::{create_s3_client, S3ImageSource};
///
/// let client = create_s3_client(None, "us-east-1").await;
/// let source = S3ImageSource::new(client, "dicom".to_string(), Some("ct/".to_string()));
///
/// // The image ID "1.dcm" becomes the key "ct/1.dcm"
/// let resolved = source.resolve("1.dcm").await?;
/// ```
#[derive(Clone)]
pub struct S3ImageSource {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3ImageSource {
    pub fn new(client: Client, bucket: String, prefix: Option<String>) -> Self {
        let prefix = prefix.filter(|p| !p.is_empty());
        Self {
            client,
            bucket,
            prefix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for an identifier.
    pub fn object_key(&self, image_id: &str) -> String {
        match &self.prefix {
            Some(prefix) if prefix.ends_with('/') => format!("{}{}", prefix, image_id),
            Some(prefix) => format!("{}/{}", prefix, image_id),
            None => image_id.to_string(),
        }
    }

    fn identity(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Classify a failed S3 request, detecting missing objects.
///
/// `service_not_found` is the typed check from the operation's service
/// error; the raw status and the error text are checked as fallbacks since
/// some S3-compatible services report missing keys differently.
fn classify_error(
    image_id: &str,
    service_not_found: bool,
    status: Option<u16>,
    message: String,
) -> SourceError {
    if service_not_found || status == Some(404) {
        return SourceError::NotFound(image_id.to_string());
    }

    if message.contains("NotFound") || message.contains("NoSuchKey") || message.contains("404") {
        return SourceError::NotFound(image_id.to_string());
    }

    SourceError::Storage(message)
}

#[async_trait]
impl ImageSource for S3ImageSource {
    async fn resolve(&self, image_id: &str) -> Result<SourceRef, SourceError> {
        validate_image_id(image_id)?;

        let key = self.object_key(image_id);
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                let status = e.raw_response().map(|r| r.status().as_u16());
                classify_error(image_id, not_found, status, DisplayErrorContext(&e).to_string())
            })?;

        debug!(image_id, key = %key, "Resolved S3 image");

        Ok(SourceRef {
            image_id: image_id.to_string(),
            identity: self.identity(&key),
            key,
        })
    }

    async fn read_bytes(&self, source: &SourceRef) -> Result<Bytes, SourceError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&source.key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                let status = e.raw_response().map(|r| r.status().as_u16());
                classify_error(
                    &source.image_id,
                    not_found,
                    status,
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| SourceError::Storage(format!("Failed to read body: {}", e)))?;

        Ok(body.into_bytes())
    }
}

/// Create an S3 client with optional custom endpoint.
///
/// When an endpoint is given (MinIO, LocalStack, ...), path-style addressing
/// is forced.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
