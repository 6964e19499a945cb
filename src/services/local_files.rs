//! On-disk layout for downloaded originals and resized outputs.
//!
//! ```text
//! {base}/downloads/{album_id}/{file}         local materialization of each asset
//! {base}/resized/{album}_{profile}/{file}    letterboxed outputs
//! ```
//!
//! Every path component coming from the gallery or the user is reduced to a
//! single safe file name before it touches the filesystem.

use std::{
    collections::HashSet,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};
use tokio::fs;
use uuid::Uuid;

const MAX_COMPONENT_LEN: usize = 255;

#[derive(Clone, Debug)]
pub struct LocalFiles {
    base_path: PathBuf,
}

impl LocalFiles {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding the local copies of one gallery album's assets.
    ///
    /// Keyed by the gallery album id: display names are not unique.
    pub fn download_dir(&self, album_id: &str) -> PathBuf {
        let mut path = self.base_path.join("downloads");
        path.push(safe_component(album_id));
        path
    }

    pub fn resized_root(&self) -> PathBuf {
        self.base_path.join("resized")
    }

    /// Output directory keyed by `{album_name}_{profile_name}`.
    pub fn output_dir(&self, album_name: &str, profile_name: &str) -> PathBuf {
        self.resized_root()
            .join(output_dir_name(album_name, profile_name))
    }

    /// Existing local copy of an asset, if a previous run left one behind.
    pub async fn read_existing(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

pub fn output_dir_name(album_name: &str, profile_name: &str) -> String {
    safe_component(&format!("{}_{}", album_name, profile_name))
}

/// Reduce an untrusted name to one path component.
///
/// Drops any directory part, replaces separators and control characters, and
/// never returns an empty string, `.` or `..`.
pub fn safe_component(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | '\0' | ':') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim();
    let cleaned = if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    };
    truncate_chars(cleaned, MAX_COMPONENT_LEN)
}

fn truncate_chars(value: String, max: usize) -> String {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Safe, unique file names for a list of `(asset_id, filename)` pairs, in order.
///
/// Names in `reserved` are never handed out. A taken name gets the asset id
/// appended to its stem, then a counter until it is free.
pub fn unique_file_names<'a, I>(reserved: &[&str], assets: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut seen: HashSet<String> = reserved.iter().map(|name| name.to_string()).collect();
    let mut names = Vec::new();
    for (asset_id, filename) in assets {
        let base = safe_component(filename);
        let mut name = base.clone();
        let mut counter = 1;
        while !seen.insert(name.clone()) {
            let suffix = if counter == 1 {
                safe_component(asset_id)
            } else {
                format!("{}_{}", safe_component(asset_id), counter)
            };
            name = with_stem_suffix(&base, &suffix);
            counter += 1;
        }
        names.push(name);
    }
    names
}

fn with_stem_suffix(name: &str, suffix: &str) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}_{}", stem, suffix),
    }
}

/// Write bytes to `path` through a temp file and rename, creating parents.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = parent_of(path)?;
    fs::create_dir_all(&parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    if let Err(err) = fs::write(&tmp_path, bytes).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    Ok(())
}

/// Blocking variant of [`write_atomic`] for worker threads.
pub fn write_atomic_blocking<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut std::fs::File) -> io::Result<()>,
{
    let parent = parent_of(path)?;
    std::fs::create_dir_all(&parent)?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let result = (|| {
        let mut file = std::fs::File::create(&tmp_path)?;
        write(&mut file)?;
        file.flush()?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

fn parent_of(path: &Path) -> io::Result<PathBuf> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        io::Error::new(ErrorKind::Other, "output path missing parent directory")
    })
}
