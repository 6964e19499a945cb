//! Tracked units of long-running work and their progress records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Download,
    Resize,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Download => "download",
            TaskKind::Resize => "resize",
        }
    }
}

/// Lifecycle state. Moves only forward: pending, running, then completed or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task row without its artifact bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Task {
    /// Caller-generated unique id.
    pub id: String,

    pub kind: TaskKind,

    pub status: TaskStatus,

    /// Units processed so far (assets for downloads, images for resizes).
    pub progress: i64,

    /// Expected unit count; the owning worker may revise it once the real count is known.
    pub total: i64,

    /// Human-readable phase, or the error message of a failed task.
    pub current_step: Option<String>,

    /// Display name, e.g. `Holidays` or `Holidays (frame, phone)`.
    pub label: String,

    /// Gallery album id a download task pulls from.
    pub album_id: Option<String>,

    /// Downloaded album a resize task reads from.
    pub downloaded_album_id: Option<i64>,

    /// Profiles a resize task renders, snapshotted at creation.
    pub profile_ids: Option<Json<Vec<i64>>>,

    pub artifact_size: i64,

    /// MD5 of the packaged artifact.
    pub artifact_etag: Option<String>,

    /// Images that rendered or were already present, for resize tasks.
    pub processed_count: i64,

    pub failed_count: i64,

    pub created_at: DateTime<Utc>,

    /// Set once, when the task enters a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// What a new task is about. Decides its kind and foreign references.
#[derive(Debug, Clone)]
pub enum TaskContext {
    Download {
        album_id: String,
        album_name: String,
    },
    Resize {
        downloaded_album_id: i64,
        profile_ids: Vec<i64>,
        label: String,
    },
}

impl TaskContext {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskContext::Download { .. } => TaskKind::Download,
            TaskContext::Resize { .. } => TaskKind::Resize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub context: TaskContext,
    pub total: i64,
}

/// Packaged output of a resize task.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub data: Vec<u8>,
    pub etag: String,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<i64>,
    pub total: Option<i64>,
    pub current_step: Option<String>,
    pub artifact: Option<Artifact>,
    pub processed_count: Option<i64>,
    pub failed_count: Option<i64>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus, step: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            current_step: Some(step.into()),
            ..Self::default()
        }
    }

    pub fn progress(progress: i64, step: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            current_step: Some(step.into()),
            ..Self::default()
        }
    }

    pub fn with_total(mut self, total: i64) -> Self {
        self.total = Some(total);
        self
    }
}

/// Result of applying a [`TaskUpdate`]. Never an error: progress bookkeeping
/// must not abort the work it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// No task with that id.
    Missing,
    /// The task already reached a terminal state; the update was ignored.
    Terminal,
    /// The store stayed busy or failed; the update was dropped.
    Dropped(String),
}

/// Row shown by the progress view.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TaskSummary {
    pub task_type: TaskKind,
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub progress: i64,
    pub total: i64,
    pub current_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            task_type: task.kind,
            id: task.id,
            name: task.label,
            status: task.status,
            progress: task.progress,
            total: task.total,
            current_step: task.current_step,
            created_at: task.created_at,
            completed_at: task.completed_at,
        }
    }
}

/// Completed resize task with a retrievable artifact.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct CompletedResize {
    pub id: String,
    pub label: String,
    pub artifact_size: i64,
    pub processed_count: i64,
    pub created_at: DateTime<Utc>,
}
