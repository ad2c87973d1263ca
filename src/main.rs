//! DICOM imaging service - windowed PNG rendering for DICOM images.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dicom_imaging::cache::DEFAULT_PURGE_INTERVAL;
use dicom_imaging::{
    create_router, create_s3_client, AppState, CacheLayer, Config, ImageService, ImageSource,
    LocalImageSource, MemoryBackend, S3ImageSource, WorkerPool,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    info!("Configuration:");
    match config.s3_bucket {
        Some(ref bucket) => {
            info!("  Source: s3://{}/{}", bucket, config.s3_prefix.as_deref().unwrap_or(""));
            if let Some(ref endpoint) = config.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            info!("  S3 region: {}", config.s3_region);
        }
        None => info!("  Source: {}", config.data_dir.display()),
    }

    if config.cache_enabled {
        info!(
            "  Cache: {}MB, {} entries max, TTL {}s/{}s/{}s (image/thumbnail/metadata)",
            config.cache_capacity / (1024 * 1024),
            config.cache_max_entries,
            config.image_ttl,
            config.thumbnail_ttl,
            config.metadata_ttl
        );
    } else {
        warn!("  Cache: DISABLED - every request runs the full pixel pipeline");
    }

    if config.admin_token.is_some() {
        info!("  Admin routes: token required");
    } else {
        warn!("  Admin routes: OPEN - anyone can clear the cache");
        warn!("        Protect them with --admin-token=<token>");
    }

    info!(
        "  Volumes: at most {} slices, {:.0}% must load",
        config.volume_max_slices,
        config.volume_min_completeness * 100.0
    );

    let pool = match WorkerPool::new(config.workers) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to start worker pool: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("  Workers: {}", pool.size());

    let cache = if config.cache_enabled {
        let backend = Arc::new(MemoryBackend::with_capacity_and_entries(
            config.cache_capacity,
            config.cache_max_entries,
        ));
        backend.spawn_purge_task(DEFAULT_PURGE_INTERVAL);
        CacheLayer::new(backend, config.ttl_policy())
    } else {
        CacheLayer::disabled()
    };

    match config.s3_bucket.clone() {
        Some(bucket) => {
            let client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;

            info!("");
            info!("Connecting to S3...");
            if let Err(e) = test_s3_connection(&client, &bucket).await {
                error!("  Failed to connect to S3: {}", e);
                error!("");
                error!("  Please check:");
                error!("    - Your AWS credentials are configured correctly");
                error!("    - The bucket '{}' exists and is accessible", bucket);
                error!("    - The S3 endpoint is correct (if using MinIO/custom S3)");
                return ExitCode::FAILURE;
            }
            info!("  Connected successfully");

            let source = S3ImageSource::new(client, bucket, config.s3_prefix.clone());
            serve(&config, source, cache, pool).await
        }
        None => {
            if !config.data_dir.is_dir() {
                warn!(
                    "  Data directory {} does not exist; every image will return 404",
                    config.data_dir.display()
                );
            }
            let source = LocalImageSource::new(config.data_dir.clone());
            serve(&config, source, cache, pool).await
        }
    }
}

/// Build the router around the chosen source and run the server.
async fn serve<S: ImageSource>(
    config: &Config,
    source: S,
    cache: CacheLayer,
    pool: WorkerPool,
) -> ExitCode {
    let images = ImageService::new(source, cache, pool);
    let state = AppState::new(images, config.volume_limits());
    let router = create_router(state, config.router_config());

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/presets", addr);
    info!("    curl 'http://{}/images/<image_id>?preset=lung'", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("██████╗ ██╗ ██████╗ ██████╗ ███╗   ███╗");
    info!("██╔══██╗██║██╔════╝██╔═══██╗████╗ ████║");
    info!("██║  ██║██║██║     ██║   ██║██╔████╔██║");
    info!("██║  ██║██║██║     ██║   ██║██║╚██╔╝██║");
    info!("██████╔╝██║╚██████╗╚██████╔╝██║ ╚═╝ ██║");
    info!("╚═════╝ ╚═╝ ╚═════╝ ╚═════╝ ╚═╝     ╚═╝");
    info!("");
    info!("                imaging v{}", version);
}

/// Check that the bucket is reachable with the configured credentials.
async fn test_s3_connection(client: &aws_sdk_s3::Client, bucket: &str) -> Result<(), String> {
    client
        .head_bucket()
        .bucket(bucket)
        .send()
        .await
        .map_err(|e| format!("{}", aws_sdk_s3::error::DisplayErrorContext(e)))?;

    Ok(())
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dicom_imaging=debug,tower_http=debug"
    } else {
        "dicom_imaging=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
