//! User-managed resize profiles.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    errors::{PipelineError, PipelineResult, is_unique_violation},
    models::profile::{NewProfile, ResizeProfile},
};

const MAX_DIMENSION: i64 = 16_384;

#[derive(Clone)]
pub struct ProfileStore {
    db: SqlitePool,
}

impl ProfileStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Reject empty names and boxes outside `1..=16384` pixels.
    fn validate(profile: &NewProfile) -> PipelineResult<()> {
        if profile.name.trim().is_empty() {
            return Err(PipelineError::Invalid("profile name is empty".into()));
        }
        for (field, value) in [("width", profile.width), ("height", profile.height)] {
            if !(1..=MAX_DIMENSION).contains(&value) {
                return Err(PipelineError::Invalid(format!(
                    "profile {} must be between 1 and {}, got {}",
                    field, MAX_DIMENSION, value
                )));
            }
        }
        Ok(())
    }

    fn conflict(name: &str) -> impl FnOnce(sqlx::Error) -> PipelineError + '_ {
        move |err| {
            if is_unique_violation(&err) {
                PipelineError::Integrity(format!("profile `{}` already exists", name))
            } else {
                err.into()
            }
        }
    }

    pub async fn create(&self, profile: &NewProfile) -> PipelineResult<ResizeProfile> {
        Self::validate(profile)?;
        sqlx::query_as(
            "INSERT INTO resize_profiles
                (name, width, height, include_horizontal, include_vertical, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, name, width, height, include_horizontal, include_vertical, created_at",
        )
        .bind(profile.name.trim())
        .bind(profile.width)
        .bind(profile.height)
        .bind(profile.include_horizontal)
        .bind(profile.include_vertical)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await
        .map_err(Self::conflict(&profile.name))
    }

    /// Newest first.
    pub async fn list(&self) -> PipelineResult<Vec<ResizeProfile>> {
        let rows = sqlx::query_as(
            "SELECT id, name, width, height, include_horizontal, include_vertical, created_at
             FROM resize_profiles ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: i64) -> PipelineResult<ResizeProfile> {
        sqlx::query_as(
            "SELECT id, name, width, height, include_horizontal, include_vertical, created_at
             FROM resize_profiles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PipelineError::not_found("profile", id))
    }

    /// Profiles for the given ids, in the order given. Any unknown id is an error.
    pub async fn get_many(&self, ids: &[i64]) -> PipelineResult<Vec<ResizeProfile>> {
        let mut profiles = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.get(id).await {
                Ok(profile) => profiles.push(profile),
                Err(PipelineError::NotFound { .. }) => {
                    return Err(PipelineError::Integrity(format!(
                        "resize profile {} does not exist",
                        id
                    )));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(profiles)
    }

    pub async fn update(&self, id: i64, profile: &NewProfile) -> PipelineResult<ResizeProfile> {
        Self::validate(profile)?;
        sqlx::query_as(
            "UPDATE resize_profiles
             SET name = ?, width = ?, height = ?, include_horizontal = ?, include_vertical = ?
             WHERE id = ?
             RETURNING id, name, width, height, include_horizontal, include_vertical, created_at",
        )
        .bind(profile.name.trim())
        .bind(profile.width)
        .bind(profile.height)
        .bind(profile.include_horizontal)
        .bind(profile.include_vertical)
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(Self::conflict(&profile.name))?
        .ok_or_else(|| PipelineError::not_found("profile", id))
    }

    /// Returns false when no such profile existed.
    pub async fn delete(&self, id: i64) -> PipelineResult<bool> {
        let result = sqlx::query("DELETE FROM resize_profiles WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert configured profiles, or update the ones whose name already exists.
    pub async fn seed(&self, profiles: &[NewProfile]) -> PipelineResult<usize> {
        let mut seeded = 0;
        for profile in profiles {
            if let Err(err) = Self::validate(profile) {
                tracing::warn!(profile = %profile.name, error = %err, "skipping configured profile");
                continue;
            }
            sqlx::query(
                "INSERT INTO resize_profiles
                    (name, width, height, include_horizontal, include_vertical, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(name) DO UPDATE SET
                    width = excluded.width,
                    height = excluded.height,
                    include_horizontal = excluded.include_horizontal,
                    include_vertical = excluded.include_vertical",
            )
            .bind(profile.name.trim())
            .bind(profile.width)
            .bind(profile.height)
            .bind(profile.include_horizontal)
            .bind(profile.include_vertical)
            .bind(Utc::now())
            .execute(&self.db)
            .await?;
            seeded += 1;
        }
        Ok(seeded)
    }
}
