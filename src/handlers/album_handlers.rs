//! Album catalog and store statistics.

use crate::{
    errors::AppError,
    models::album::{DownloadedAlbum, StoreStats},
    state::AppState,
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

/// A gallery album plus how many of its photos are stored locally.
#[derive(Debug, Serialize, Deserialize)]
pub struct AlbumView {
    pub id: String,
    pub name: String,
    pub photo_count: i64,
    pub downloaded_photos: Option<i64>,
}

/// `GET /api/albums`
///
/// Fetches the album list from the gallery and records it locally.
pub async fn list_albums(State(state): State<AppState>) -> Result<Json<Vec<AlbumView>>, AppError> {
    let albums = state.gallery.list_albums().await?;
    state.chunks.sync_gallery_albums(&albums).await?;
    let local = state.chunks.local_asset_counts().await?;
    tracing::debug!(albums = albums.len(), "gallery albums synced");

    let views = albums
        .into_iter()
        .map(|album| AlbumView {
            downloaded_photos: local.get(&album.id).copied(),
            id: album.id,
            name: album.name,
            photo_count: album.photo_count,
        })
        .collect();
    Ok(Json(views))
}

/// `GET /api/albums/downloaded`
pub async fn list_downloaded_albums(
    State(state): State<AppState>,
) -> Result<Json<Vec<DownloadedAlbum>>, AppError> {
    Ok(Json(state.chunks.list_downloaded_albums().await?))
}

/// `GET /api/stats`
pub async fn stats(State(state): State<AppState>) -> Result<Json<StoreStats>, AppError> {
    Ok(Json(state.chunks.stats().await?))
}
