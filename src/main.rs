use anyhow::{Context, Result};
use media_gateway::{
    config::{AppConfig, Backend},
    handlers::AppState,
    routes,
    services::media_service::MediaService,
    store::{
        ObjectStore,
        local::LocalStore,
        memory::MemoryStore,
        s3::{S3Settings, S3Store},
        signing::UrlSigner,
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_LOG_FILTER: &str = "media_gateway=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting media-gateway with config: {:?}", cfg);

    // --- Handle migration mode ---
    if migrate {
        let db = connect_sqlite(&cfg.database_url).await?;
        LocalStore::migrate(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize object store ---
    let (store, local): (Arc<dyn ObjectStore>, Option<LocalStore>) = match cfg.backend {
        Backend::Local => {
            let local = open_local_store(&cfg).await?;
            let store: Arc<dyn ObjectStore> = Arc::new(local.clone());
            (store, Some(local))
        }
        Backend::S3 => {
            let settings = S3Settings {
                bucket: cfg.bucket.clone(),
                region: cfg.s3_region.clone(),
                endpoint_url: cfg.s3_endpoint.clone(),
                force_path_style: cfg.s3_force_path_style,
            };
            let store: Arc<dyn ObjectStore> = Arc::new(S3Store::connect(settings).await);
            (store, None)
        }
        Backend::Memory => {
            tracing::warn!("Using the in-memory backend; uploads are lost on exit");
            let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new(cfg.bucket.clone()));
            (store, None)
        }
    };

    // --- Initialize core service ---
    let media = MediaService::new(store)
        .with_max_upload_bytes(cfg.max_upload_bytes)
        .with_signed_url_ttl(cfg.signed_url_ttl);
    let mut state = AppState::new(media);
    if let Some(local) = local {
        state = state.with_local_store(local);
    }

    // --- Build router ---
    let app = routes::routes::routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the SQLite catalog, creating the file and its directory if needed.
async fn connect_sqlite(db_url: &str) -> Result<SqlitePool> {
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating database directory {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{db_url}`"))?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {db_url}"))
}

async fn open_local_store(cfg: &AppConfig) -> Result<LocalStore> {
    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir).await?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db = connect_sqlite(&cfg.database_url).await?;
    LocalStore::migrate(&db).await?;

    let signer = match cfg.signing_secret.as_deref() {
        Some(secret) => UrlSigner::new(secret),
        None => {
            tracing::warn!(
                "MEDIA_GATEWAY_SIGNING_SECRET is not set; signed URLs will stop working on restart"
            );
            UrlSigner::ephemeral()
        }
    };
    let public_url = Url::parse(&cfg.public_url)
        .with_context(|| format!("parsing public url `{}`", cfg.public_url))?;

    let store = LocalStore::open(
        Arc::new(db),
        &cfg.storage_dir,
        &cfg.bucket,
        signer,
        public_url,
    )
    .await
    .context("opening local object store")?;
    Ok(store)
}
