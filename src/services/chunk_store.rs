//! Chunked storage of album payloads in SQLite.
//!
//! `save_chunks` writes the album summary row first and then each chunk in
//! its own statement, so no single write holds the database lock for a whole
//! album. A failure partway leaves the summary row and a prefix of chunks
//! behind. That state is not rolled back; readers detect it by comparing
//! `chunk_count` against the chunks actually present (see [`ChunkStore::is_complete`]).

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::{
    db::retry_on_busy,
    errors::{PipelineError, PipelineResult},
    models::album::{AlbumIdentity, DownloadedAlbum, GalleryAlbum, StoreStats},
};

#[derive(Clone)]
pub struct ChunkStore {
    db: SqlitePool,
}

/// Split a payload into consecutive slices of at most `chunk_size` bytes.
///
/// An empty payload yields no chunks.
pub fn split_into_chunks(payload: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    payload
        .chunks(chunk_size.max(1))
        .map(<[u8]>::to_vec)
        .collect()
}

/// Images attributed to each chunk: an even share, with the remainder going
/// to the earliest chunks.
pub fn chunk_photo_counts(photo_count: i64, chunk_count: usize) -> Vec<i64> {
    if chunk_count == 0 {
        return Vec::new();
    }
    let photo_count = photo_count.max(0);
    let n = chunk_count as i64;
    let base = photo_count / n;
    let extra = photo_count % n;
    (0..n).map(|i| base + i64::from(i < extra)).collect()
}

impl ChunkStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist an album's payload chunks and return the new album id.
    pub async fn save_chunks(
        &self,
        album: &AlbumIdentity,
        chunks: &[Vec<u8>],
    ) -> PipelineResult<i64> {
        let total_size: i64 = chunks.iter().map(|c| c.len() as i64).sum();
        let counts = chunk_photo_counts(album.photo_count, chunks.len());
        let created_at = Utc::now();

        let album_db_id = retry_on_busy("insert downloaded album", || {
            sqlx::query_scalar::<_, i64>(
                "INSERT INTO downloaded_albums
                    (album_id, album_name, photo_count, total_size, chunk_count, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(&album.album_id)
            .bind(&album.album_name)
            .bind(album.photo_count)
            .bind(total_size)
            .bind(chunks.len() as i64)
            .bind(created_at)
            .fetch_one(&self.db)
        })
        .await?;

        for (index, (chunk, photo_count)) in chunks.iter().zip(counts).enumerate() {
            retry_on_busy("insert album chunk", || {
                sqlx::query(
                    "INSERT INTO album_chunks
                        (album_id, chunk_index, chunk_data, chunk_size, photo_count)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(album_db_id)
                .bind(index as i64)
                .bind(chunk.as_slice())
                .bind(chunk.len() as i64)
                .bind(photo_count)
                .execute(&self.db)
            })
            .await
            .map_err(|err| {
                tracing::error!(
                    album_db_id,
                    chunk_index = index,
                    error = %err,
                    "chunk write failed; album left incomplete"
                );
                PipelineError::from(err)
            })?;
        }

        tracing::info!(
            album_db_id,
            album = %album.album_name,
            chunks = chunks.len(),
            total_size,
            "stored album payload"
        );
        Ok(album_db_id)
    }

    /// Chunk payloads of an album in `chunk_index` order.
    pub async fn read_chunks(&self, album_db_id: i64) -> PipelineResult<Vec<Vec<u8>>> {
        let chunks = sqlx::query_scalar(
            "SELECT chunk_data FROM album_chunks WHERE album_id = ? ORDER BY chunk_index ASC",
        )
        .bind(album_db_id)
        .fetch_all(&self.db)
        .await?;
        Ok(chunks)
    }

    /// Per-chunk image counts in `chunk_index` order.
    #[cfg(test)]
    pub async fn chunk_photo_counts(&self, album_db_id: i64) -> PipelineResult<Vec<i64>> {
        let counts = sqlx::query_scalar(
            "SELECT photo_count FROM album_chunks WHERE album_id = ? ORDER BY chunk_index ASC",
        )
        .bind(album_db_id)
        .fetch_all(&self.db)
        .await?;
        Ok(counts)
    }

    /// True when every chunk `0..chunk_count` is present.
    pub async fn is_complete(&self, album: &DownloadedAlbum) -> PipelineResult<bool> {
        let (present, max_index): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(chunk_index) FROM album_chunks WHERE album_id = ?",
        )
        .bind(album.id)
        .fetch_one(&self.db)
        .await?;
        Ok(present == album.chunk_count
            && max_index.map_or(album.chunk_count == 0, |max| max + 1 == album.chunk_count))
    }

    pub async fn get_album(&self, album_db_id: i64) -> PipelineResult<DownloadedAlbum> {
        sqlx::query_as(
            "SELECT id, album_id, album_name, photo_count, total_size, chunk_count, created_at
             FROM downloaded_albums WHERE id = ?",
        )
        .bind(album_db_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PipelineError::not_found("downloaded album", album_db_id))
    }

    pub async fn list_downloaded_albums(&self) -> PipelineResult<Vec<DownloadedAlbum>> {
        let rows = sqlx::query_as(
            "SELECT id, album_id, album_name, photo_count, total_size, chunk_count, created_at
             FROM downloaded_albums ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Downloaded photo count keyed by gallery album id (latest download wins).
    pub async fn local_asset_counts(&self) -> PipelineResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT album_id, photo_count FROM downloaded_albums ORDER BY id ASC")
                .fetch_all(&self.db)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Record the gallery's album catalog.
    pub async fn sync_gallery_albums(&self, albums: &[GalleryAlbum]) -> PipelineResult<()> {
        let mut tx = self.db.begin().await?;
        let now = Utc::now();
        for album in albums {
            sqlx::query(
                "INSERT INTO gallery_albums (id, name, photo_count, last_synced)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    photo_count = excluded.photo_count,
                    last_synced = excluded.last_synced",
            )
            .bind(&album.id)
            .bind(&album.name)
            .bind(album.photo_count)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn gallery_album(&self, album_id: &str) -> PipelineResult<Option<GalleryAlbum>> {
        let album = sqlx::query_as("SELECT id, name, photo_count FROM gallery_albums WHERE id = ?")
            .bind(album_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(album)
    }

    pub async fn stats(&self) -> PipelineResult<StoreStats> {
        let (album_count, image_count): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), SUM(photo_count) FROM gallery_albums")
                .fetch_one(&self.db)
                .await?;
        let download_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM downloaded_albums")
            .fetch_one(&self.db)
            .await?;
        Ok(StoreStats {
            album_count,
            image_count: image_count.unwrap_or(0),
            download_count,
        })
    }
}
