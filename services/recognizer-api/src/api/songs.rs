//!
//! src/api/songs.rs
//!
//! Song lookup, explicit submission, popularity ranking and the recognize
//! upload
//!

use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection, Multipart, Path, Query, State},
    http::StatusCode,
    Json
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::{json_body, AppState, DeviceId};
use crate::errors::AppError;
use crate::fetch::AudioClip;
use crate::recognize::{self, resolve_artists, split_artists};
use crate::types::{NewSong, Song, SongView, StreamingLinks};

pub const AUDIO_FIELD: &str = "audio";
pub const TOP_DEFAULT: u32 = 10;
pub const TOP_MAX: u32 = 50;

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<Json<SongView>, AppError> {
    Uuid::parse_str(&id)
        .map_err(|_| AppError::BadRequest("Invalid song ID format".to_string()))?;
    let song = state.db.find_song(&id).await?
        .ok_or_else(|| AppError::NotFound("Song not found".to_string()))?;
    Ok(Json(state.db.song_view(song).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SongSubmission {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub isrc: Option<String>,
    pub spotify_id: Option<String>,
    pub album: Option<String>,
    pub cover_url: Option<String>,
    pub duration_ms: Option<i64>,
    pub links: Option<StreamingLinks>,
    pub spotify_uri: Option<String>,
    pub preview_url: Option<String>,
    pub genre: Option<String>,
    pub release_date: Option<String>,
    pub popularity: Option<i64>,
}

fn present(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn existing(state: &AppState, isrc: Option<&str>, spotify_id: Option<&str>) ->
    Result<Option<Song>, AppError> {
    if let Some(isrc) = isrc {
        if let Some(song) = state.db.find_song_by_isrc(isrc).await? {
            return Ok(Some(song));
        }
    }
    match spotify_id {
        Some(id) => state.db.find_song_by_spotify_id(id).await,
        None => Ok(None),
    }
}

/// POST /songs. Known isrc or spotify id returns the stored song with 200
pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<SongSubmission>, JsonRejection>
) -> Result<(StatusCode, Json<SongView>), AppError> {
    let body       = json_body(payload)?;
    let isrc       = present(body.isrc);
    let spotify_id = present(body.spotify_id);
    let title      = present(body.title)
        .ok_or_else(|| AppError::MissingInput("title is required".to_string()))?;
    if isrc.is_none() && spotify_id.is_none() {
        return Err(AppError::MissingInput("isrc or spotify_id is required".to_string()));
    }

    if let Some(song) = existing(&state, isrc.as_deref(), spotify_id.as_deref()).await? {
        return Ok((StatusCode::OK, Json(state.db.song_view(song).await?)));
    }

    let artist  = present(body.artist).unwrap_or_else(|| "Unknown Artist".to_string());
    let names   = split_artists(&artist);
    let artists = resolve_artists(&state.db, state.providers.catalog.as_ref(), &names).await?;

    let mut links = body.links.unwrap_or_default();
    if links.youtube.is_empty() {
        links.youtube = recognize::youtube_link(&title, &artist);
    }

    let song = state.db.insert_song(NewSong {
        isrc,
        spotify_id,
        title,
        artist,
        artist_ids: artists.into_iter().map(|a| a.id).collect(),
        album: present(body.album).unwrap_or_else(|| "Unknown Album".to_string()),
        cover_url: body.cover_url.unwrap_or_default(),
        duration_ms: body.duration_ms,
        links,
        spotify_uri: present(body.spotify_uri),
        preview_url: body.preview_url.unwrap_or_default(),
        genre: present(body.genre).unwrap_or_else(|| "Unknown".to_string()),
        release_date: present(body.release_date),
        popularity: body.popularity,
    }).await?;
    info!(song_id = %song.id, "song.submitted");

    Ok((StatusCode::CREATED, Json(state.db.song_view(song).await?)))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub limit: Option<u32>,
}

pub async fn top_popular(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>
) -> Result<Json<Vec<SongView>>, AppError> {
    let limit = query.limit.unwrap_or(TOP_DEFAULT).clamp(1, TOP_MAX);
    let mut views = Vec::new();
    for song in state.db.top_songs(limit).await? {
        views.push(state.db.song_view(song).await?);
    }
    Ok(Json(views))
}

/// Takes the first part named `audio`, anything else is skipped
async fn read_clip(upload: Result<Multipart, MultipartRejection>) ->
    Result<Option<AudioClip>, AppError> {
    let Ok(mut upload) = upload else {
        return Ok(None);
    };

    while let Some(field) = upload.next_field().await? {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }
        let file_name    = field.file_name().unwrap_or("audio").to_string();
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes        = field.bytes().await?;
        return Ok(Some(AudioClip { bytes: bytes.to_vec(), file_name, content_type }));
    }
    Ok(None)
}

pub async fn recognize(
    State(state): State<AppState>,
    device: Option<DeviceId>,
    upload: Result<Multipart, MultipartRejection>
) -> Result<(StatusCode, Json<SongView>), AppError> {
    let clip = read_clip(upload).await?;
    let device = device.as_ref().map(DeviceId::as_str);

    let out = recognize::recognize(&state.db, &state.providers, clip, device).await?;
    let status = if out.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(out.view)))
}
