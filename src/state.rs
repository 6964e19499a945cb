//! Shared handles passed to every handler.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    config::AppConfig,
    services::{
        chunk_store::ChunkStore, downloader::DownloadOrchestrator, gallery_client::GalleryClient,
        local_files::LocalFiles, profile_store::ProfileStore, progress::ProgressReporter,
        resizer::ResizeEngine, task_store::TaskStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub files: LocalFiles,
    pub tasks: TaskStore,
    pub chunks: ChunkStore,
    pub profiles: ProfileStore,
    pub gallery: Arc<dyn GalleryClient>,
    pub downloads: DownloadOrchestrator,
    pub resizes: ResizeEngine,
    pub progress: ProgressReporter,
}

impl AppState {
    pub fn new(db: SqlitePool, cfg: &AppConfig, gallery: Arc<dyn GalleryClient>) -> Self {
        let files = LocalFiles::new(cfg.storage_dir.clone());
        let tasks = TaskStore::new(db.clone());
        let chunks = ChunkStore::new(db.clone());
        let profiles = ProfileStore::new(db.clone());

        let downloads = DownloadOrchestrator::new(
            tasks.clone(),
            chunks.clone(),
            gallery.clone(),
            files.clone(),
            cfg.chunk_size,
            cfg.fetch_attempts,
        );
        let resizes = ResizeEngine::new(
            tasks.clone(),
            chunks.clone(),
            profiles.clone(),
            files.clone(),
            cfg.resize_workers,
        );
        let progress = ProgressReporter::new(tasks.clone());

        Self {
            db,
            files,
            tasks,
            chunks,
            profiles,
            gallery,
            downloads,
            resizes,
            progress,
        }
    }
}
