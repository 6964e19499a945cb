use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::services::{
    gallery_client::{GalleryClient, ImmichClient, UnconfiguredGallery},
    profile_store::ProfileStore,
};

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

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
        storage_dir = %cfg.storage_dir.display(),
        database_url = %cfg.database_url,
        immich_url = ?cfg.immich_url,
        chunk_size = cfg.chunk_size,
        resize_workers = cfg.resize_workers,
        "Starting immich-resizer"
    );

    // --- Ensure storage directory exists ---
    if !cfg.storage_dir.exists() {
        std::fs::create_dir_all(&cfg.storage_dir)
            .with_context(|| format!("creating {}", cfg.storage_dir.display()))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir.display());
    }

    // --- Initialize SQLite connection + schema ---
    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    let seeded = ProfileStore::new(db.clone())
        .seed(&cfg.resize_profiles)
        .await?;
    if seeded > 0 {
        tracing::info!(seeded, "Seeded resize profiles from configuration");
    }

    // --- Gallery client ---
    let gallery: Arc<dyn GalleryClient> = match &cfg.immich_url {
        Some(url) => {
            let client = ImmichClient::new(url, cfg.immich_api_key.as_deref().unwrap_or_default())?;
            tracing::info!(base_url = client.base_url(), "Using Immich gallery");
            Arc::new(client)
        }
        None => {
            tracing::warn!("IMMICH_URL not set; gallery requests will fail");
            Arc::new(UnconfiguredGallery)
        }
    };

    // --- Build router ---
    let app_state = state::AppState::new(db, &cfg, gallery);
    let app: Router = routes::routes::routes().with_state(app_state);

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
