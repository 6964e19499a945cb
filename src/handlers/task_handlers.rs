//! Task endpoints: start downloads and resizes, poll progress, fetch artifacts.

use crate::{
    errors::AppError,
    models::task::{CompletedResize, Task, TaskSummary},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StartDownloadReq {
    pub album_id: String,
    pub album_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartResizeReq {
    pub downloaded_album_id: i64,
    pub profile_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStarted {
    pub task_id: String,
}

/// `POST /api/downloads`
pub async fn start_download(
    State(state): State<AppState>,
    Json(req): Json<StartDownloadReq>,
) -> Result<impl IntoResponse, AppError> {
    let task_id = state
        .downloads
        .start_download(&req.album_id, req.album_name.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(TaskStarted { task_id })))
}

/// `POST /api/resizes`
pub async fn start_resize(
    State(state): State<AppState>,
    Json(req): Json<StartResizeReq>,
) -> Result<impl IntoResponse, AppError> {
    let task_id = state
        .resizes
        .start_resize(req.downloaded_album_id, &req.profile_ids)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(TaskStarted { task_id })))
}

/// `GET /api/tasks`
pub async fn list_active_tasks(
    State(state): State<AppState>,
) -> Result<Json<Vec<TaskSummary>>, AppError> {
    Ok(Json(state.progress.get_active_tasks().await?))
}

/// `GET /api/tasks/completed`
pub async fn list_completed_resizes(
    State(state): State<AppState>,
) -> Result<Json<Vec<CompletedResize>>, AppError> {
    Ok(Json(state.tasks.list_completed_resizes().await?))
}

/// `GET /api/tasks/{id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.tasks.get(&task_id).await?))
}

/// `GET /api/tasks/{id}/artifact`
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, AppError> {
    let (data, etag) = state.tasks.get_artifact(&task_id).await?;

    let mut response = data.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"resize-{}.zip\"", task_id)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(etag) = etag {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }
    Ok(response)
}

/// `DELETE /api/tasks/{id}`: only completed tasks can be deleted.
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.tasks.delete_completed(&task_id).await? {
        tracing::info!(task_id = %task_id, "completed task deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!(
            "no completed task `{}`",
            task_id
        )))
    }
}
