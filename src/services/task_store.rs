//! Durable task records.
//!
//! Invariants enforced here rather than by callers:
//! - status only moves forward (`pending` -> `running` -> `completed | failed`);
//! - `progress` never decreases and never exceeds `total`;
//! - `completed_at` is stamped once, by the update that enters a terminal state;
//! - a terminal task ignores all further updates.
//!
//! Each update is a single `UPDATE` statement, so concurrent updates to one
//! task serialize inside SQLite (last writer wins per field) and updates to
//! different tasks touch different rows.

use chrono::Utc;
use sqlx::{SqlitePool, types::Json};

use crate::{
    db::retry_on_busy,
    errors::{PipelineError, PipelineResult, is_unique_violation},
    models::task::{
        CompletedResize, NewTask, Task, TaskContext, TaskKind, TaskStatus, TaskUpdate,
        UpdateOutcome,
    },
};

const TASK_COLUMNS: &str = "id, kind, status, progress, total, current_step, label, album_id, \
     downloaded_album_id, profile_ids, artifact_size, artifact_etag, processed_count, \
     failed_count, created_at, completed_at";

pub const INITIAL_STEP: &str = "Initializing...";

#[derive(Clone)]
pub struct TaskStore {
    db: SqlitePool,
}

impl TaskStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a `pending` task. The id comes from the caller and must be new.
    pub async fn create(&self, task: &NewTask) -> PipelineResult<String> {
        let (label, album_id, downloaded_album_id, profile_ids) = match &task.context {
            TaskContext::Download {
                album_id,
                album_name,
            } => (album_name.clone(), Some(album_id.clone()), None, None),
            TaskContext::Resize {
                downloaded_album_id,
                profile_ids,
                label,
            } => (
                label.clone(),
                None,
                Some(*downloaded_album_id),
                Some(Json(profile_ids.clone())),
            ),
        };

        let result = sqlx::query(
            "INSERT INTO tasks
                (id, kind, status, progress, total, current_step, label, album_id,
                 downloaded_album_id, profile_ids, created_at)
             VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(task.context.kind())
        .bind(TaskStatus::Pending)
        .bind(task.total.max(0))
        .bind(INITIAL_STEP)
        .bind(label)
        .bind(album_id)
        .bind(downloaded_album_id)
        .bind(profile_ids)
        .bind(Utc::now())
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(task_id = %task.id, kind = task.context.kind().as_str(), "task created");
                Ok(task.id.clone())
            }
            Err(err) if is_unique_violation(&err) => Err(PipelineError::DuplicateId(task.id.clone())),
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a partial update. Never fails: a missing task, a terminal task, or
    /// a store that stays busy is reported through [`UpdateOutcome`] and logged.
    pub async fn update(&self, task_id: &str, update: TaskUpdate) -> UpdateOutcome {
        let artifact_size = update.artifact.as_ref().map(|a| a.data.len() as i64);
        let (artifact_data, artifact_etag) = match update.artifact {
            Some(artifact) => (Some(artifact.data), Some(artifact.etag)),
            None => (None, None),
        };
        let now = Utc::now();

        let result = retry_on_busy("update task", || {
            sqlx::query(
                "UPDATE tasks SET
                    status = CASE
                        WHEN ?1 IS NULL THEN status
                        WHEN status = 'running' AND ?1 = 'pending' THEN status
                        ELSE ?1 END,
                    completed_at = CASE
                        WHEN ?1 IN ('completed', 'failed') THEN ?2
                        ELSE completed_at END,
                    total = COALESCE(?4, total),
                    progress = CASE
                        WHEN ?3 IS NULL THEN progress
                        ELSE MAX(progress, MIN(?3, COALESCE(?4, total))) END,
                    current_step = COALESCE(?5, current_step),
                    artifact = COALESCE(?6, artifact),
                    artifact_size = COALESCE(?7, artifact_size),
                    artifact_etag = COALESCE(?8, artifact_etag),
                    processed_count = COALESCE(?9, processed_count),
                    failed_count = COALESCE(?10, failed_count)
                 WHERE id = ?11 AND status NOT IN ('completed', 'failed')",
            )
            .bind(update.status)
            .bind(now)
            .bind(update.progress)
            .bind(update.total)
            .bind(update.current_step.as_deref())
            .bind(artifact_data.as_deref())
            .bind(artifact_size)
            .bind(artifact_etag.as_deref())
            .bind(update.processed_count)
            .bind(update.failed_count)
            .bind(task_id)
            .execute(&self.db)
        })
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                if let Some(status) = update.status {
                    tracing::debug!(task_id, %status, "task status updated");
                }
                UpdateOutcome::Applied
            }
            Ok(_) => match self.status_of(task_id).await {
                Ok(Some(status)) => {
                    tracing::debug!(task_id, %status, "ignoring update to finished task");
                    UpdateOutcome::Terminal
                }
                Ok(None) => {
                    tracing::warn!(task_id, "update for unknown task");
                    UpdateOutcome::Missing
                }
                Err(err) => {
                    tracing::warn!(task_id, error = %err, "task update dropped");
                    UpdateOutcome::Dropped(err.to_string())
                }
            },
            Err(err) => {
                tracing::warn!(task_id, error = %err, "task update dropped");
                UpdateOutcome::Dropped(err.to_string())
            }
        }
    }

    async fn status_of(&self, task_id: &str) -> PipelineResult<Option<TaskStatus>> {
        let status = sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(status)
    }

    pub async fn get(&self, task_id: &str) -> PipelineResult<Task> {
        sqlx::query_as(&format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS))
            .bind(task_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| PipelineError::not_found("task", task_id))
    }

    /// Most recent tasks of one kind, newest first.
    pub async fn list_recent(&self, kind: TaskKind, limit: i64) -> PipelineResult<Vec<Task>> {
        let rows = sqlx::query_as(&format!(
            "SELECT {} FROM tasks WHERE kind = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(kind)
        .bind(limit.max(0))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Completed resize tasks that carry an artifact, newest first.
    pub async fn list_completed_resizes(&self) -> PipelineResult<Vec<CompletedResize>> {
        let rows = sqlx::query_as(
            "SELECT id, label, artifact_size, processed_count, created_at
             FROM tasks
             WHERE kind = 'resize' AND status = 'completed' AND artifact IS NOT NULL
             ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Artifact bytes and etag; only completed tasks expose one.
    pub async fn get_artifact(&self, task_id: &str) -> PipelineResult<(Vec<u8>, Option<String>)> {
        let row: Option<(Option<Vec<u8>>, Option<String>)> = sqlx::query_as(
            "SELECT artifact, artifact_etag FROM tasks WHERE id = ? AND status = 'completed'",
        )
        .bind(task_id)
        .fetch_optional(&self.db)
        .await?;
        match row {
            Some((Some(data), etag)) => Ok((data, etag)),
            _ => Err(PipelineError::not_found("artifact", task_id)),
        }
    }

    /// Delete a completed task and its artifact. Returns false when there was
    /// no completed task with that id.
    pub async fn delete_completed(&self, task_id: &str) -> PipelineResult<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND status = 'completed'")
            .bind(task_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
