//!
//! src/api/users.rs
//!
//! Device users and their search history
//!

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::{json_body, AppState, DeviceId};
use crate::errors::AppError;
use crate::types::{Artist, SongView, User};

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub song_id: Option<String>,
}

async fn user_for(state: &AppState, device: &DeviceId) -> Result<User, AppError> {
    state.db.find_user_by_device(device.as_str()).await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// POST /users, 201 when the device is new and 200 when it is known
pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateUser>, JsonRejection>
) -> Result<(StatusCode, Json<User>), AppError> {
    let device = json_body(payload)?.device_id
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppError::MissingInput("device_id is required".to_string()))?;

    let (user, created) = state.db.ensure_user(&device).await?;
    if created {
        info!(user_id = %user.id, device = %device, "user.created");
        Ok((StatusCode::CREATED, Json(user)))
    } else {
        Ok((StatusCode::OK, Json(user)))
    }
}

pub async fn add_history(
    State(state): State<AppState>,
    device: DeviceId,
    payload: Result<Json<HistoryEntry>, JsonRejection>
) -> Result<Json<User>, AppError> {
    let song_id = json_body(payload)?.song_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::MissingInput("song_id is required".to_string()))?;
    Uuid::parse_str(&song_id)
        .map_err(|_| AppError::BadRequest("Invalid song ID format".to_string()))?;

    let user = user_for(&state, &device).await?;
    if state.db.find_song(&song_id).await?.is_none() {
        return Err(AppError::NotFound("Song not found".to_string()));
    }

    state.db.append_history(&user, &song_id).await?;
    let user = user_for(&state, &device).await?;
    Ok(Json(user))
}

pub async fn history(
    State(state): State<AppState>,
    device: DeviceId
) -> Result<Json<Vec<SongView>>, AppError> {
    let user = user_for(&state, &device).await?;
    let mut views = Vec::with_capacity(user.history.len());
    for song in state.db.history_songs(&user).await? {
        views.push(state.db.song_view(song).await?);
    }
    Ok(Json(views))
}

pub async fn clear_history(
    State(state): State<AppState>,
    device: DeviceId
) -> Result<Json<Value>, AppError> {
    let user = user_for(&state, &device).await?;
    state.db.clear_history(&user).await?;
    Ok(Json(json!({ "message": "Search history cleared" })))
}

pub async fn remove_history(
    State(state): State<AppState>,
    device: DeviceId,
    Path(song_id): Path<String>
) -> Result<Json<Value>, AppError> {
    let user = user_for(&state, &device).await?;
    if !state.db.remove_history(&user, &song_id).await? {
        return Err(AppError::NotFound("Song not in search history".to_string()));
    }
    Ok(Json(json!({ "message": "Song removed from search history", "song_id": song_id })))
}

pub async fn artists_from_history(
    State(state): State<AppState>,
    device: DeviceId
) -> Result<Json<Vec<Artist>>, AppError> {
    let user = user_for(&state, &device).await?;
    Ok(Json(state.db.history_artists(&user).await?))
}
