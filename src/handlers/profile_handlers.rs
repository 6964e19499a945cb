use crate::{
    errors::AppError,
    models::profile::{NewProfile, ResizeProfile},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// `GET /api/profiles`
pub async fn list_profiles(
    State(state): State<AppState>,
) -> Result<Json<Vec<ResizeProfile>>, AppError> {
    Ok(Json(state.profiles.list().await?))
}

/// `POST /api/profiles`
pub async fn create_profile(
    State(state): State<AppState>,
    Json(req): Json<NewProfile>,
) -> Result<(StatusCode, Json<ResizeProfile>), AppError> {
    let profile = state.profiles.create(&req).await?;
    tracing::info!(profile_id = profile.id, name = %profile.name, "profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

/// `GET /api/profiles/{id}`
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ResizeProfile>, AppError> {
    Ok(Json(state.profiles.get(id).await?))
}

/// `PUT /api/profiles/{id}`
pub async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NewProfile>,
) -> Result<Json<ResizeProfile>, AppError> {
    Ok(Json(state.profiles.update(id, &req).await?))
}

/// `DELETE /api/profiles/{id}`
pub async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if state.profiles.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("profile `{}` not found", id)))
    }
}
