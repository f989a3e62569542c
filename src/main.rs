use anyhow::Result;
use jwt_compact::alg::Hs256Key;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    catalog_service::CatalogService,
    oss_client::{ObjectStore, OssClient, OssConfig},
    reconcile_service::DeletionReconciler,
    tts_service::{TtsConfig, TtsManager},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        database_url = %cfg.database_url,
        "starting cdn-gateway"
    );

    // --- Ensure the audio artifact directory exists ---
    let tts_output_dir = PathBuf::from(&cfg.tts_output_dir);
    if !tts_output_dir.exists() {
        fs::create_dir_all(&tts_output_dir)?;
        tracing::info!("Created audio directory at {}", tts_output_dir.display());
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // Make sure the database file exists before SQLx opens it.
    match fs::OpenOptions::new().create(true).write(true).open(db_path) {
        Ok(_) => tracing::debug!("Database file ready at {}", db_path),
        Err(e) => tracing::warn!("Failed to open database file {}: {}", db_path, e),
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&cfg.database_url)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize services ---
    let oss: Arc<dyn ObjectStore> = Arc::new(OssClient::new(OssConfig {
        access_key_id: cfg.access_key_id.clone(),
        access_key_secret: cfg.access_key_secret.clone(),
        endpoint: cfg.oss_endpoint.clone(),
    }));
    let catalog = CatalogService::new(db.clone());
    let reconciler = DeletionReconciler::new(db.clone(), oss.clone());
    let tts = TtsManager::new(TtsConfig::new(
        cfg.tts_ws_url.clone(),
        cfg.tts_api_key.clone(),
        tts_output_dir.clone(),
    ));

    let app_state = state::AppState {
        db: db.clone(),
        catalog,
        reconciler,
        oss,
        tts,
        token_key: Arc::new(Hs256Key::new(cfg.token_secret.as_bytes())),
        tts_output_dir,
    };

    // --- Build router ---
    let app = routes::routes::routes(app_state);

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

/// Run SQLite migrations manually from the SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
