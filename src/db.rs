//! SQLite pool construction, schema application, and busy handling.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::{future::Future, path::Path, str::FromStr, time::Duration};

use crate::errors::is_busy;

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Connection-level wait before SQLite reports the database as busy.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts for a statement that keeps failing with SQLITE_BUSY.
const BUSY_ATTEMPTS: u32 = 4;
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// Open a pool tuned for one process with concurrent readers and writers.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    connect_with_busy_timeout(database_url, BUSY_TIMEOUT).await
}

async fn connect_with_busy_timeout(database_url: &str, busy_timeout: Duration) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(busy_timeout)
        .foreign_keys(true);

    if let Some(parent) = Path::new(options.get_filename()).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = SCHEMA
        .split(';')
        .map(strip_comments)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(&stmt).execute(db).await?;
    }

    Ok(())
}

fn strip_comments(chunk: &str) -> String {
    chunk
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Re-run `op` with exponential backoff while SQLite reports busy/locked.
/// Other errors, and the last busy error, are returned unchanged.
pub async fn retry_on_busy<T, F, Fut>(what: &str, mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut delay = BUSY_BACKOFF;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if is_busy(&err) && attempt < BUSY_ATTEMPTS => {
                tracing::warn!(attempt, what, error = %err, "store busy, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}
