use clap::Parser;
use orb_core::config::{StorageBackend, StoreConfig};
use orb_core::db::Database;
use orb_core::http::auth::AuthService;
use orb_core::http::{router, AppState};
use orb_core::kv::KvStore;
use orb_core::listen::{HubRegistry, OrbSessionBackend};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Orb server -- lossless music streaming with listen-along sessions.
///
/// Serves range-aware audio and HLS manifests out of the object store,
/// backed by the Postgres catalog and the Redis presence layer.
#[derive(Parser)]
#[command(name = "orb-server")]
struct Args {
    /// Address to bind the server to.
    #[arg(long, default_value = "0.0.0.0", env = "ORB_BIND")]
    bind: String,

    /// Port for the HTTP server.
    #[arg(long, default_value = "4004", env = "ORB_PORT")]
    port: u16,

    /// Postgres DSN for the catalog.
    #[arg(long, env = "ORB_DB_DSN")]
    db_dsn: String,

    /// Redis URL for the KV layer.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "ORB_REDIS_URL")]
    redis_url: String,

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

    /// Secret for signing access tokens.
    #[arg(long, env = "ORB_JWT_SECRET")]
    jwt_secret: String,

    /// Access-token (and session-presence) lifetime in seconds.
    #[arg(long, default_value = "3600", env = "ORB_ACCESS_TTL")]
    access_ttl: u64,
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    info!("orb-server starting");

    let backend: StorageBackend = args.store_backend.parse().unwrap_or_else(|e| {
        error!("{e}");
        std::process::exit(1);
    });

    let store_config = StoreConfig {
        backend,
        root: args.store_root.clone(),
        bucket: args.store_bucket.clone(),
        s3_region: args.s3_region.clone(),
        s3_endpoint: args.s3_endpoint.clone(),
        s3_access_key: args.s3_access_key.clone(),
        s3_secret_key: args.s3_secret_key.clone(),
    };
    if let Err(e) = store_config.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    let db = Database::connect(&args.db_dsn).await.unwrap_or_else(|e| {
        error!("Failed to connect to catalog: {e}");
        std::process::exit(1);
    });

    let kv = KvStore::connect(&args.redis_url).await.unwrap_or_else(|e| {
        error!("Failed to connect to KV layer: {e}");
        std::process::exit(1);
    });

    let storage = orb_core::storage::from_config(&store_config)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to initialize object store: {e}");
            std::process::exit(1);
        });

    let session_backend = Arc::new(OrbSessionBackend::new(kv.clone(), db.clone()));
    let hubs = Arc::new(HubRegistry::new(session_backend));

    let state = AppState {
        db,
        kv,
        storage,
        hubs,
        auth: AuthService::new(&args.jwt_secret, args.access_ttl),
    };

    let app = router(state);

    let addr = format!("{}:{}", args.bind, args.port);
    info!("Binding to {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        });

    info!("orb-server listening on http://{addr}");
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
