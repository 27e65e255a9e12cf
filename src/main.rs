use anyhow::Result;
use axum::Router;
use scribe_uploads::{
    config::{AppConfig, RunMode},
    routes,
    services::{
        chunk_store::FsChunkStore,
        media_probe::FfprobeMediaProbe,
        plan_guard::SqlitePlanResolver,
        session_store::{SqliteSessionStore, run_migrations},
        sweeper::StaleSessionSweeper,
        upload_service::UploadService,
    },
    state::AppState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const SWEEP_BATCH: i64 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting scribe-uploads ({:?}) with config: {:?}", mode, cfg);

    // --- Ensure storage directories exist ---
    for dir in [&cfg.storage_dir, &cfg.temp_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    // --- Collaborators ---
    let policy = cfg.upload_policy();
    let sessions = Arc::new(SqliteSessionStore::new(db.clone()));
    let chunks = Arc::new(FsChunkStore::new(&cfg.storage_dir));

    match mode {
        RunMode::Migrate => {
            run_migrations(&db).await?;
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        RunMode::SweepExpired => {
            let sweeper = StaleSessionSweeper::new(sessions, chunks, policy);
            let report = sweeper.sweep(SWEEP_BATCH).await?;
            tracing::info!(?report, "Sweep complete.");
            return Ok(());
        }
        RunMode::Serve => {}
    }

    // --- Initialize core service ---
    let uploads = UploadService::new(
        sessions,
        chunks,
        Arc::new(FfprobeMediaProbe::new(&cfg.ffprobe_path)),
        Arc::new(SqlitePlanResolver::new(db.clone())),
        policy,
    );
    let state = AppState {
        uploads,
        db: db.clone(),
        storage_dir: cfg.storage_dir.clone().into(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_chunk_bytes).with_state(state);

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
