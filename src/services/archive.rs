//! ZIP framing for album payloads and resize artifacts.
//!
//! An album payload is a stored (uncompressed) archive with one entry per
//! asset followed by `manifest.json`, which keeps the gallery's asset id and
//! orientation next to each file name. Photos are already compressed, so
//! entries are stored as-is.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    io::{Cursor, Read, Write},
    path::PathBuf,
};
use zip::{CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions};

use crate::errors::{PipelineError, PipelineResult};

pub const MANIFEST_NAME: &str = "manifest.json";

/// One asset inside an album payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumImage {
    pub asset_id: String,
    pub filename: String,
    pub orientation: Option<u8>,
    pub bytes: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ManifestEntry {
    asset_id: String,
    filename: String,
    orientation: Option<u8>,
}

fn stored() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true)
}

/// Frame an album's images into one payload.
///
/// File names must be unique and must not be [`MANIFEST_NAME`].
pub fn pack_album(images: &[AlbumImage]) -> PipelineResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut manifest = Vec::with_capacity(images.len());
    for image in images {
        if image.filename == MANIFEST_NAME {
            return Err(PipelineError::Invalid(format!(
                "asset `{}` uses the reserved name {}",
                image.asset_id, MANIFEST_NAME
            )));
        }
        zip.start_file(image.filename.as_str(), stored())?;
        zip.write_all(&image.bytes)?;
        manifest.push(ManifestEntry {
            asset_id: image.asset_id.clone(),
            filename: image.filename.clone(),
            orientation: image.orientation,
        });
    }
    zip.start_file(MANIFEST_NAME, stored())?;
    zip.write_all(&serde_json::to_vec(&manifest)?)?;
    Ok(zip.finish()?.into_inner())
}

/// Reverse of [`pack_album`], in manifest order.
///
/// Archives without a manifest yield every file entry with no orientation.
pub fn unpack_album(payload: &[u8]) -> PipelineResult<Vec<AlbumImage>> {
    let mut archive = ZipArchive::new(Cursor::new(payload))?;

    let manifest: Option<Vec<ManifestEntry>> = match archive.by_name(MANIFEST_NAME) {
        Ok(mut file) => {
            let mut raw = Vec::new();
            file.read_to_end(&mut raw)?;
            Some(serde_json::from_slice(&raw)?)
        }
        Err(ZipError::FileNotFound) => None,
        Err(err) => return Err(err.into()),
    };

    let mut contents: HashMap<String, Vec<u8>> = HashMap::new();
    let mut order = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        if file.is_dir() || file.name() == MANIFEST_NAME {
            continue;
        }
        let name = file.name().to_string();
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        order.push(name.clone());
        contents.insert(name, bytes);
    }

    let images = match manifest {
        Some(entries) => entries
            .into_iter()
            .filter_map(|entry| {
                let bytes = contents.remove(&entry.filename)?;
                Some(AlbumImage {
                    asset_id: entry.asset_id,
                    filename: entry.filename,
                    orientation: entry.orientation,
                    bytes,
                })
            })
            .collect(),
        None => order
            .into_iter()
            .filter_map(|name| {
                let bytes = contents.remove(&name)?;
                Some(AlbumImage {
                    asset_id: name.clone(),
                    filename: name,
                    orientation: None,
                    bytes,
                })
            })
            .collect(),
    };
    Ok(images)
}

/// Package files from disk as `(entry name, source path)` into one archive.
pub fn pack_files(files: &[(String, PathBuf)]) -> PipelineResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (entry_name, source) in files {
        let entry_name = entry_name.replace('\\', "/");
        zip.start_file(entry_name.as_str(), stored())?;
        let mut file = std::fs::File::open(source)?;
        std::io::copy(&mut file, &mut zip)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Entry names of an archive.
#[cfg(test)]
pub fn entry_names(archive_bytes: &[u8]) -> PipelineResult<Vec<String>> {
    let archive = ZipArchive::new(Cursor::new(archive_bytes))?;
    Ok(archive.file_names().map(str::to_string).collect())
}
