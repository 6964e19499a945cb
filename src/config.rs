use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

use crate::models::profile::NewProfile;

const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;
const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub database_url: String,
    pub immich_url: Option<String>,
    pub immich_api_key: Option<String>,
    pub chunk_size: usize,
    pub fetch_attempts: u32,
    pub resize_workers: usize,
    pub resize_profiles: Vec<NewProfile>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Immich album downloader and letterbox resizer")]
pub struct Args {
    /// Host to bind to (overrides IMMICH_RESIZER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMMICH_RESIZER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for downloaded originals and resized outputs (overrides IMMICH_RESIZER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Database URL (overrides IMMICH_RESIZER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Immich server URL (overrides IMMICH_URL)
    #[arg(long)]
    pub immich_url: Option<String>,

    /// Chunk size in bytes for stored album payloads (overrides IMMICH_RESIZER_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Attempts per asset before a download fails (overrides IMMICH_RESIZER_FETCH_ATTEMPTS)
    #[arg(long)]
    pub fetch_attempts: Option<u32>,

    /// Parallel image workers for resize tasks (overrides IMMICH_RESIZER_RESIZE_WORKERS)
    #[arg(long)]
    pub resize_workers: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args, |name| env::var(name))?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };

        let env_host = var("IMMICH_RESIZER_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "IMMICH_RESIZER_PORT")?.unwrap_or(3000);
        let env_storage = var("IMMICH_RESIZER_STORAGE_DIR")?.unwrap_or_else(|| "./data".into());
        let env_db = var("IMMICH_RESIZER_DATABASE_URL")?
            .unwrap_or_else(|| "sqlite://./data/meta/immich_resizer.db".into());
        let env_chunk = parse_var(&var, "IMMICH_RESIZER_CHUNK_SIZE")?;
        let env_attempts = parse_var(&var, "IMMICH_RESIZER_FETCH_ATTEMPTS")?;
        let env_workers = parse_var(&var, "IMMICH_RESIZER_RESIZE_WORKERS")?;

        let chunk_size = args.chunk_size.or(env_chunk).unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }

        let resize_profiles = match var("RESIZE_PROFILES")? {
            Some(raw) => parse_profiles(&raw),
            None => Vec::new(),
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or_else(|| env_storage.into()),
            database_url: args.database_url.unwrap_or(env_db),
            immich_url: args.immich_url.or(var("IMMICH_URL")?),
            immich_api_key: var("IMMICH_API_KEY")?,
            chunk_size,
            fetch_attempts: args
                .fetch_attempts
                .or(env_attempts)
                .unwrap_or(DEFAULT_FETCH_ATTEMPTS)
                .max(1),
            resize_workers: args
                .resize_workers
                .or(env_workers)
                .unwrap_or_else(default_workers)
                .max(1),
            resize_profiles,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
impl AppConfig {
    /// Small chunks and a single fetch attempt, rooted at `storage_dir`.
    pub fn for_tests(storage_dir: &std::path::Path) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            storage_dir: storage_dir.to_path_buf(),
            database_url: String::new(),
            immich_url: None,
            immich_api_key: None,
            chunk_size: 1024,
            fetch_attempts: 1,
            resize_workers: 2,
            resize_profiles: Vec::new(),
        }
    }
}

fn parse_var<T, V>(var: &V, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Result<Option<String>>,
{
    match var(name)? {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(None),
    }
}

/// Profiles seeded from `RESIZE_PROFILES`; malformed JSON yields an empty list.
fn parse_profiles(raw: &str) -> Vec<NewProfile> {
    match serde_json::from_str::<Vec<NewProfile>>(raw) {
        Ok(profiles) => profiles,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed RESIZE_PROFILES");
            Vec::new()
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
