//! Remote photo gallery access.
//!
//! [`GalleryClient`] is the seam the download orchestrator fetches through.
//! [`ImmichClient`] talks to an Immich server's REST API.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::{
    errors::{PipelineError, PipelineResult},
    models::album::{AssetRef, GalleryAlbum},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait GalleryClient: Send + Sync {
    async fn list_albums(&self) -> PipelineResult<Vec<GalleryAlbum>>;

    /// Assets of one album, in gallery order.
    async fn list_assets(&self, album_id: &str) -> PipelineResult<Vec<AssetRef>>;

    /// Original bytes of one asset.
    async fn fetch_asset_bytes(&self, asset_id: &str) -> PipelineResult<Vec<u8>>;
}

/// Stand-in used when no gallery URL is configured. Every call is `Unreachable`.
pub struct UnconfiguredGallery;

#[async_trait]
impl GalleryClient for UnconfiguredGallery {
    async fn list_albums(&self) -> PipelineResult<Vec<GalleryAlbum>> {
        Err(not_configured())
    }

    async fn list_assets(&self, _album_id: &str) -> PipelineResult<Vec<AssetRef>> {
        Err(not_configured())
    }

    async fn fetch_asset_bytes(&self, _asset_id: &str) -> PipelineResult<Vec<u8>> {
        Err(not_configured())
    }
}

fn not_configured() -> PipelineError {
    PipelineError::Unreachable("no gallery URL configured".into())
}

#[derive(Debug, Clone)]
pub struct ImmichClient {
    client: reqwest::Client,
    base_url: String,
}

/// Ensure the base URL ends in exactly one `/api`.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{}/api", trimmed)
    }
}

impl ImmichClient {
    pub fn new(url: &str, api_key: &str) -> PipelineResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| PipelineError::Invalid(format!("invalid API key header value: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> PipelineResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Unreachable(format!("GET {url}: {e}")))?;

        let status = response.status();
        tracing::debug!(%status, %url, "gallery response");
        if !status.is_success() {
            return Err(PipelineError::HttpError {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> PipelineResult<T> {
        self.get(path)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::Unreachable(format!("malformed gallery response: {e}")))
    }
}

#[async_trait]
impl GalleryClient for ImmichClient {
    async fn list_albums(&self) -> PipelineResult<Vec<GalleryAlbum>> {
        let albums: Vec<RawAlbum> = self.get_json("/albums").await?;
        Ok(albums.into_iter().map(RawAlbum::into_album).collect())
    }

    async fn list_assets(&self, album_id: &str) -> PipelineResult<Vec<AssetRef>> {
        let album: RawAlbumDetail = self.get_json(&format!("/albums/{}", album_id)).await?;
        Ok(album.assets.into_iter().map(RawAsset::into_asset).collect())
    }

    async fn fetch_asset_bytes(&self, asset_id: &str) -> PipelineResult<Vec<u8>> {
        let response = self.get(&format!("/assets/{}/original", asset_id)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Unreachable(format!("reading asset {asset_id}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAlbum {
    id: String,
    #[serde(default)]
    album_name: Option<String>,
    #[serde(default)]
    asset_count: Option<i64>,
    #[serde(default)]
    asset_count_total: Option<i64>,
    #[serde(default)]
    assets: Option<Value>,
}

impl RawAlbum {
    /// `assetCount`, then `assetCountTotal`, then the length of an embedded
    /// `assets` array, else zero.
    fn photo_count(&self) -> i64 {
        self.asset_count
            .or(self.asset_count_total)
            .or_else(|| {
                self.assets
                    .as_ref()
                    .and_then(Value::as_array)
                    .map(|assets| assets.len() as i64)
            })
            .unwrap_or(0)
    }

    fn into_album(self) -> GalleryAlbum {
        let photo_count = self.photo_count();
        GalleryAlbum {
            name: self.album_name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            photo_count,
        }
    }
}

#[derive(Deserialize)]
struct RawAlbumDetail {
    #[serde(default)]
    assets: Vec<RawAsset>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAsset {
    id: String,
    #[serde(default)]
    original_file_name: Option<String>,
    #[serde(default)]
    exif_info: Option<RawExif>,
}

#[derive(Deserialize)]
struct RawExif {
    #[serde(default)]
    orientation: Option<Value>,
}

impl RawAsset {
    fn into_asset(self) -> AssetRef {
        let orientation = self
            .exif_info
            .and_then(|exif| exif.orientation)
            .and_then(|value| parse_orientation(&value));
        AssetRef {
            filename: self
                .original_file_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| self.id.clone()),
            id: self.id,
            orientation,
        }
    }
}

/// EXIF orientation as reported by the gallery: a number or a numeric string, 1–8.
fn parse_orientation(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u8::try_from(raw).ok().filter(|o| (1..=8).contains(o))
}
