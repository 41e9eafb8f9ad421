//!
//! src/api/playlists.rs
//!
//! Thin handlers over src/playlists.rs, every route needs a device id
//!

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{json_body, AppState, DeviceId};
use crate::errors::AppError;
use crate::playlists::{self, ForYou};
use crate::types::PlaylistView;

#[derive(Debug, Deserialize)]
pub struct CreatePlaylist {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SharePlaylist {
    pub device_id: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    device: DeviceId,
    payload: Result<Json<CreatePlaylist>, JsonRejection>
) -> Result<(StatusCode, Json<PlaylistView>), AppError> {
    let body = json_body(payload)?;
    let view = playlists::create(&state.db, body.name.as_deref(), device.as_str()).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn all(
    State(state): State<AppState>,
    device: DeviceId
) -> Result<Json<Vec<PlaylistView>>, AppError> {
    Ok(Json(playlists::all_for_device(&state.db, device.as_str()).await?))
}

pub async fn for_you(
    State(state): State<AppState>,
    device: DeviceId
) -> Result<Json<ForYou>, AppError> {
    let feed = playlists::for_you(&state.db, state.providers.catalog.as_ref(), device.as_str()).await?;
    Ok(Json(feed))
}

pub async fn get(
    State(state): State<AppState>,
    device: DeviceId,
    Path(id): Path<String>
) -> Result<Json<PlaylistView>, AppError> {
    Ok(Json(playlists::get(&state.db, &id, device.as_str()).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    device: DeviceId,
    Path(id): Path<String>
) -> Result<Json<Value>, AppError> {
    playlists::delete(&state.db, &id, device.as_str()).await?;
    Ok(Json(json!({ "message": "Playlist deleted", "id": id })))
}

pub async fn share(
    State(state): State<AppState>,
    device: DeviceId,
    Path(id): Path<String>,
    payload: Result<Json<SharePlaylist>, JsonRejection>
) -> Result<Json<PlaylistView>, AppError> {
    let body = json_body(payload)?;
    let view = playlists::share(&state.db, &id, device.as_str(), body.device_id.as_deref()).await?;
    Ok(Json(view))
}

pub async fn leave(
    State(state): State<AppState>,
    device: DeviceId,
    Path(id): Path<String>
) -> Result<Json<Value>, AppError> {
    playlists::leave(&state.db, &id, device.as_str()).await?;
    Ok(Json(json!({ "message": "Left playlist", "id": id })))
}

pub async fn add_song(
    State(state): State<AppState>,
    device: DeviceId,
    Path((id, song_id)): Path<(String, String)>
) -> Result<Json<PlaylistView>, AppError> {
    let (view, _added) = playlists::add_song(&state.db, &id, device.as_str(), &song_id).await?;
    Ok(Json(view))
}

pub async fn remove_song(
    State(state): State<AppState>,
    device: DeviceId,
    Path((id, song_id)): Path<(String, String)>
) -> Result<Json<PlaylistView>, AppError> {
    Ok(Json(playlists::remove_song(&state.db, &id, device.as_str(), &song_id).await?))
}
