use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use tierbox::package::start_sweep_runner;
use tierbox::{
    BlobStore, Config, Database, ExpirationSweep, FileService, FsBlobStore, MetadataStore,
    PackageService, SqlMetadataStore,
};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = tierbox::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        tierbox::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("tierbox stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> tierbox::Result<()> {
    config.validate()?;

    info!("tierbox - tiered-quota file hosting");

    let db = Database::open(&config.database.path).await?;
    info!(
        "Database ready at {} (schema v{})",
        config.database.path,
        db.schema_version().await?
    );

    let store: Arc<dyn MetadataStore> = Arc::new(SqlMetadataStore::new(db.clone()));
    let fs_blobs = FsBlobStore::new(&config.storage.path)?;
    // Nothing is in flight yet, so every partial write is abandoned.
    let cleaned = fs_blobs.cleanup(Duration::ZERO).await?;
    info!(
        "Blob storage at {} ({} partial write(s), {} empty dir(s) removed)",
        config.storage.path, cleaned.partial_files, cleaned.empty_dirs
    );
    let blobs: Arc<dyn BlobStore> = Arc::new(fs_blobs);

    // Held until shutdown; a request transport embedding tierbox is handed these.
    let _packages = PackageService::new(Arc::clone(&store))
        .with_limits(config.quota.free_limit_bytes, config.quota.premium_limit_bytes)
        .with_premium_duration(config.package.premium_duration());
    let _files = FileService::new(Arc::clone(&store), blobs)
        .with_max_file_size(config.storage.max_file_size_bytes)
        .with_lapsed_upload_policy(config.package.lapsed_upload_policy)
        .with_call_timeout(config.storage.call_timeout());
    info!("Services ready; no request transport attached, running the sweep only");

    let sweeper = if config.sweep.enabled {
        Some(start_sweep_runner(
            ExpirationSweep::new(Arc::clone(&store)),
            config.sweep.interval_secs,
        ))
    } else {
        info!("Expiration sweep disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some(handle) = sweeper {
        handle.abort();
    }
    db.close().await;

    Ok(())
}
