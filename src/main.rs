//! payload-tier server binary.
//!
//! Loads configuration, opens the blob stores, starts the background jobs and
//! serves the HTTP control surface until Ctrl-C.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use payload_tier::blob::{BlobStore, CompressedBlobStore, FsBlobStore, InMemoryBlobStore};
use payload_tier::cache::tier_manager::TierStores;
use payload_tier::config::{Cli, Config, TierConfig};
use payload_tier::queue::throttle::SysinfoSampler;
use payload_tier::server::build_router;
use payload_tier::ResourceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "payload_tier=debug,tower_http=debug"
    } else {
        "payload_tier=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("payload-tier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    info!(
        memory_capacity = config.tiers.memory_capacity_bytes,
        ssd_capacity = config.tiers.ssd_capacity_bytes,
        blob_root = ?config.tiers.blob_root,
        compress = config.tiers.compress_blobs,
        "Tier capacities"
    );

    let stores = open_stores(&config.tiers).await?;
    let listen_addr = config.server.listen.clone();

    let manager = Arc::new(ResourceManager::new(
        config,
        stores,
        Arc::new(SysinfoSampler::new()),
    )?);

    let shutdown = CancellationToken::new();
    let tasks = manager.spawn_background_tasks(shutdown.clone());

    // Build the HTTP router.
    let app = build_router(manager);

    // Start the server.
    info!(addr = %listen_addr, "Starting server");
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in futures::future::join_all(tasks).await {
        if let Err(e) = task {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    info!("Stopped");
    Ok(())
}

/// Cold and SSD stores. Without a blob root both live in process memory.
async fn open_stores(tiers: &TierConfig) -> anyhow::Result<TierStores> {
    let Some(root) = &tiers.blob_root else {
        warn!("No blob_root configured, keeping blobs in memory");
        return Ok(TierStores {
            ssd: Arc::new(InMemoryBlobStore::new()),
            cold: Arc::new(InMemoryBlobStore::new()),
        });
    };

    let cold: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(root.join("cold")).await?);
    let mut ssd: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(root.join("ssd")).await?);
    if tiers.compress_blobs {
        ssd = Arc::new(CompressedBlobStore::new(ssd, tiers.zstd_level));
    }
    Ok(TierStores { ssd, cold })
}
