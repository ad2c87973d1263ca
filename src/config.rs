//! Configuration management for the DICOM imaging service.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `DICOM_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use dicom_imaging::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//!
//! println!("Listening on {}", config.bind_address());
//! ```
//!
//! # Environment Variables
//!
//! All configuration options can be set via environment variables with the `DICOM_` prefix:
//!
//! - `DICOM_HOST` - Server bind address (default: 0.0.0.0)
//! - `DICOM_PORT` - Server port (default: 8001)
//! - `DICOM_DATA_DIR` - Local directory holding DICOM files (default: ./media/dicom_files)
//! - `DICOM_S3_BUCKET` - S3 bucket name; when set, images are read from S3
//! - `DICOM_S3_PREFIX` - Key prefix inside the bucket
//! - `DICOM_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `DICOM_S3_REGION` - AWS region (default: us-east-1)
//! - `DICOM_WORKERS` - Worker threads for pixel processing (default: 0 = CPU cores)
//! - `DICOM_CACHE_ENABLED` - Enable the result cache (default: true)
//! - `DICOM_CACHE_CAPACITY` - Cache capacity in bytes (default: 256 MiB)
//! - `DICOM_CACHE_MAX_ENTRIES` - Maximum cached entries (default: 10000)
//! - `DICOM_IMAGE_TTL` / `DICOM_THUMBNAIL_TTL` / `DICOM_METADATA_TTL` - Entry lifetimes in seconds
//! - `DICOM_ADMIN_TOKEN` - Bearer token guarding the cache-clearing routes
//! - `DICOM_VOLUME_MAX_SLICES` - Maximum slices per volume request (default: 1000)
//! - `DICOM_VOLUME_MIN_COMPLETENESS` - Fraction of slices that must load (default: 0.0)
//! - `DICOM_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::cache::{TtlPolicy, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_ENTRIES};
use crate::server::RouterConfig;
use crate::service::{VolumeLimits, DEFAULT_MAX_SLICES};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8001;

/// Default directory for locally stored DICOM files.
pub const DEFAULT_DATA_DIR: &str = "./media/dicom_files";

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default lifetime of rendered images in seconds (30 minutes).
pub const DEFAULT_IMAGE_TTL: u64 = 1800;

/// Default lifetime of thumbnails in seconds (1 hour).
pub const DEFAULT_THUMBNAIL_TTL: u64 = 3600;

/// Default lifetime of metadata in seconds (2 hours).
pub const DEFAULT_METADATA_TTL: u64 = 7200;

// =============================================================================
// CLI Arguments
// =============================================================================

/// DICOM imaging service - windowed PNG rendering for DICOM images.
///
/// Decodes DICOM pixel data, applies window/level transforms, and serves
/// PNG images, thumbnails, and multi-planar reconstructions over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "dicom-imaging")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "DICOM_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "DICOM_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Directory containing DICOM files when no S3 bucket is configured.
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "DICOM_DATA_DIR")]
    pub data_dir: PathBuf,

    /// S3 bucket name containing the DICOM files.
    ///
    /// When set, images are read from S3 instead of the local data directory.
    #[arg(long, env = "DICOM_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix prepended to image identifiers inside the bucket.
    #[arg(long, env = "DICOM_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    ///
    /// If not specified, uses the default AWS S3 endpoint.
    #[arg(long, env = "DICOM_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "DICOM_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // Processing Configuration
    // =========================================================================
    /// Number of worker threads for pixel processing (0 = number of CPU cores).
    #[arg(long, default_value_t = 0, env = "DICOM_WORKERS")]
    pub workers: usize,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Enable the processed-result cache.
    ///
    /// When disabled, every request renders from the source.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "DICOM_CACHE_ENABLED")]
    pub cache_enabled: bool,

    /// Cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY, env = "DICOM_CACHE_CAPACITY")]
    pub cache_capacity: usize,

    /// Maximum number of cached entries.
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES, env = "DICOM_CACHE_MAX_ENTRIES")]
    pub cache_max_entries: usize,

    /// Lifetime of rendered images in seconds.
    #[arg(long, default_value_t = DEFAULT_IMAGE_TTL, env = "DICOM_IMAGE_TTL")]
    pub image_ttl: u64,

    /// Lifetime of thumbnails in seconds.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_TTL, env = "DICOM_THUMBNAIL_TTL")]
    pub thumbnail_ttl: u64,

    /// Lifetime of metadata in seconds.
    #[arg(long, default_value_t = DEFAULT_METADATA_TTL, env = "DICOM_METADATA_TTL")]
    pub metadata_ttl: u64,

    // =========================================================================
    // Admin Configuration
    // =========================================================================
    /// Bearer token required by the cache-clearing routes.
    ///
    /// If not provided, cache clearing is open to any caller.
    #[arg(long, env = "DICOM_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    // =========================================================================
    // Volume Configuration
    // =========================================================================
    /// Maximum number of slices accepted in one volume request.
    #[arg(long, default_value_t = DEFAULT_MAX_SLICES, env = "DICOM_VOLUME_MAX_SLICES")]
    pub volume_max_slices: usize,

    /// Fraction of requested slices that must load for a volume to be built.
    #[arg(long, default_value_t = 0.0, env = "DICOM_VOLUME_MIN_COMPLETENESS")]
    pub volume_min_completeness: f64,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "DICOM_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }

        if let Some(bucket) = &self.s3_bucket {
            if bucket.trim().is_empty() {
                return Err(
                    "S3 bucket name must not be empty. Unset DICOM_S3_BUCKET to use --data-dir"
                        .to_string(),
                );
            }
        }

        if let Some(token) = &self.admin_token {
            if token.trim().is_empty() {
                return Err(
                    "Admin token must not be empty. Set --admin-token or unset DICOM_ADMIN_TOKEN"
                        .to_string(),
                );
            }
        }

        // Cache sizing only matters when the cache is on
        if self.cache_enabled {
            if self.cache_capacity == 0 {
                return Err("cache_capacity must be greater than 0".to_string());
            }
            if self.cache_max_entries == 0 {
                return Err("cache_max_entries must be greater than 0".to_string());
            }
        }

        if self.image_ttl == 0 || self.thumbnail_ttl == 0 || self.metadata_ttl == 0 {
            return Err("cache TTLs must be greater than 0 seconds".to_string());
        }

        if self.volume_max_slices == 0 {
            return Err("volume_max_slices must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.volume_min_completeness) {
            return Err("volume_min_completeness must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-namespace cache lifetimes.
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            image: Duration::from_secs(self.image_ttl),
            thumbnail: Duration::from_secs(self.thumbnail_ttl),
            metadata: Duration::from_secs(self.metadata_ttl),
        }
    }

    pub fn volume_limits(&self) -> VolumeLimits {
        VolumeLimits {
            max_slices: self.volume_max_slices,
            min_completeness: self.volume_min_completeness,
        }
    }

    /// Build the HTTP router configuration.
    pub fn router_config(&self) -> RouterConfig {
        let mut router_config = RouterConfig::new().with_tracing(!self.no_tracing);

        if let Some(ref token) = self.admin_token {
            router_config = router_config.with_admin_token(token.clone());
        }

        if let Some(ref origins) = self.cors_origins {
            router_config = router_config.with_cors_origins(origins.clone());
        }

        router_config
    }
}

// =============================================================================
// Tests
// =============================================================================
