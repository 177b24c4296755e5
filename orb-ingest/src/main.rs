use clap::Parser;
use orb_core::config::{default_workers, IngestConfig, StorageBackend, StoreConfig};
use orb_core::db::Database;
use orb_core::ingest::{watch, IngestEngine};
use std::path::PathBuf;
use tracing::{error, info};
use uuid::Uuid;

/// Orb ingest -- scan an audio tree into the catalog and object store.
///
/// Idempotent and restart-safe: unchanged files are skipped via the durable
/// skip index, and re-running over the same tree never duplicates rows.
#[derive(Parser)]
#[command(name = "orb-ingest")]
struct Args {
    /// Root directory to scan.
    #[arg(long, env = "ORB_INGEST_DIR")]
    dir: PathBuf,

    /// Postgres DSN for the catalog.
    #[arg(long = "db", env = "ORB_DB_DSN")]
    db_dsn: String,

    /// Object store backend: local or s3.
    #[arg(long, default_value = "local", env = "ORB_STORE_BACKEND")]
    store_backend: String,

    /// Root directory for the local store backend.
    #[arg(long, default_value = "./orb-store", env = "ORB_STORE_ROOT")]
    store_root: PathBuf,

    /// Bucket for the s3 backend.
    #[arg(long, env = "ORB_STORE_BUCKET")]
    store_bucket: Option<String>,

    /// S3 region.
    #[arg(long, env = "ORB_S3_REGION")]
    s3_region: Option<String>,

    /// S3 endpoint URL (for S3-compatible services like MinIO).
    #[arg(long, env = "ORB_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// S3 access key.
    #[arg(long, env = "ORB_S3_ACCESS_KEY")]
    s3_access_key: Option<String>,

    /// S3 secret key.
    #[arg(long, env = "ORB_S3_SECRET_KEY")]
    s3_secret_key: Option<String>,

    /// Add ingested tracks to this user's library.
    #[arg(long)]
    user_id: Option<Uuid>,

    /// Recurse into subdirectories.
    #[arg(long)]
    recursive: bool,

    /// Log what would be ingested without touching anything.
    #[arg(long)]
    dry_run: bool,

    /// Keep running after the scan and react to filesystem changes.
    #[arg(long)]
    watch: bool,

    /// Worker pool size; defaults to the processor count.
    #[arg(long)]
    workers: Option<usize>,
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    let backend: StorageBackend = args.store_backend.parse().unwrap_or_else(|e| {
        error!("{e}");
        std::process::exit(1);
    });

    let config = IngestConfig {
        dir: args.dir,
        db_dsn: args.db_dsn,
        store: StoreConfig {
            backend,
            root: args.store_root,
            bucket: args.store_bucket,
            s3_region: args.s3_region,
            s3_endpoint: args.s3_endpoint,
            s3_access_key: args.s3_access_key,
            s3_secret_key: args.s3_secret_key,
        },
        owner_user_id: args.user_id,
        recursive: args.recursive,
        dry_run: args.dry_run,
        watch: args.watch,
        workers: args.workers.unwrap_or_else(default_workers),
    };

    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    let db = Database::connect(&config.db_dsn).await.unwrap_or_else(|e| {
        error!("Failed to connect to catalog: {e}");
        std::process::exit(1);
    });

    let storage = orb_core::storage::from_config(&config.store)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to initialize object store: {e}");
            std::process::exit(1);
        });

    info!(
        "Scanning {} with {} workers{}",
        config.dir.display(),
        config.workers,
        if config.dry_run { " (dry run)" } else { "" }
    );

    let watch_after_scan = config.watch;
    let engine = IngestEngine::new(config, db, storage);

    // Scan failures after startup are per-file and already counted; only a
    // failure to even start the scan is fatal.
    if let Err(e) = engine.run().await {
        error!("Ingest failed to start: {e}");
        std::process::exit(1);
    }

    if watch_after_scan {
        info!("Entering watch mode (ctrl-c to stop)");
        tokio::select! {
            result = watch::watch_loop(engine) => {
                if let Err(e) = result {
                    error!("Watcher failed: {e}");
                    std::process::exit(1);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
            }
        }
    }
}
