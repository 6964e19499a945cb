//! Albums as known to the gallery and as stored locally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An album listed by the remote gallery, cached locally for stats and display.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct GalleryAlbum {
    pub id: String,
    pub name: String,
    pub photo_count: i64,
}

/// An asset inside a gallery album.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AssetRef {
    pub id: String,
    pub filename: String,

    /// EXIF orientation (1–8) reported by the gallery, if any.
    pub orientation: Option<u8>,
}

/// Identity and size of an album handed to the chunk store.
#[derive(Debug, Clone)]
pub struct AlbumIdentity {
    pub album_id: String,
    pub album_name: String,
    pub photo_count: i64,
}

/// Summary row for an album whose payload lives in `album_chunks`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct DownloadedAlbum {
    pub id: i64,

    /// Gallery album id this was downloaded from.
    pub album_id: String,

    pub album_name: String,

    pub photo_count: i64,

    /// Sum of chunk byte lengths.
    pub total_size: i64,

    pub chunk_count: i64,

    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub album_count: i64,
    pub image_count: i64,
    pub download_count: i64,
}
