//!
//! src/playlists.rs
//!
//! Playlist aggregator. Resolves stored track references into song views,
//! enforces owner and member rules, and builds the for-you feed from the
//! catalog
//!

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::persistent::Persistent;
use crate::providers::{Catalog, CatalogTrack};
use crate::types::{Playlist, PlaylistView, Song, TrackRef};

/// Artists from history used to seed the for-you feed
pub const FOR_YOU_SEEDS: usize = 3;
pub const FOR_YOU_PER_SEED: u32 = 10;

fn parse_id(raw: &str, what: &str) -> Result<(), AppError> {
    Uuid::parse_str(raw)
        .map(|_| ())
        .map_err(|_| AppError::BadRequest(format!("Invalid {what} ID format")))
}

/// Resolves each reference in order, dropping the ones that no longer point
/// at a stored song
pub async fn view(db: &Persistent, playlist: Playlist, device: &str) ->
    Result<PlaylistView, AppError> {
    let mut tracks = Vec::with_capacity(playlist.tracks.len());
    for track in &playlist.tracks {
        if let Some(song) = db.resolve_track(track).await? {
            tracks.push(db.song_view(song).await?);
        }
    }

    Ok( PlaylistView {
        is_owner: playlist.is_owner(device),
        members: playlist.access.len(),
        id: playlist.id,
        name: playlist.name,
        created_at: playlist.created_at,
        owner_device: playlist.owner_device,
        tracks,
    })
}

pub async fn all_for_device(db: &Persistent, device: &str) ->
    Result<Vec<PlaylistView>, AppError> {
    let playlists = db.playlists_for_device(device).await?;
    join_all(playlists.into_iter().map(|p| view(db, p, device)))
        .await
        .into_iter()
        .collect()
}

async fn load(db: &Persistent, id: &str) -> Result<Playlist, AppError> {
    parse_id(id, "playlist")?;
    db.find_playlist(id).await?
        .ok_or_else(|| AppError::NotFound("Playlist not found".to_string()))
}

async fn load_as_member(db: &Persistent, id: &str, device: &str) -> Result<Playlist, AppError> {
    let playlist = load(db, id).await?;
    if !playlist.is_member(device) {
        return Err(AppError::Forbidden("You do not have access to this playlist".to_string()));
    }
    Ok(playlist)
}

async fn load_as_owner(db: &Persistent, id: &str, device: &str) -> Result<Playlist, AppError> {
    let playlist = load(db, id).await?;
    if !playlist.is_owner(device) {
        return Err(AppError::Forbidden("Only the playlist owner can do that".to_string()));
    }
    Ok(playlist)
}

pub async fn create(db: &Persistent, name: Option<&str>, device: &str) ->
    Result<PlaylistView, AppError> {
    let name = name.map(str::trim).filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::MissingInput("Playlist name is required".to_string()))?;

    let playlist = db.create_playlist(name, device).await?;
    info!(playlist_id = %playlist.id, owner = device, "playlist.created");
    view(db, playlist, device).await
}

pub async fn get(db: &Persistent, id: &str, device: &str) -> Result<PlaylistView, AppError> {
    let playlist = load_as_member(db, id, device).await?;
    view(db, playlist, device).await
}

pub async fn delete(db: &Persistent, id: &str, device: &str) -> Result<(), AppError> {
    let playlist = load_as_owner(db, id, device).await?;
    db.delete_playlist(&playlist.id).await?;
    info!(playlist_id = %playlist.id, "playlist.deleted");
    Ok(())
}

/// Adds `target` to the access list. Sharing with a member changes nothing
pub async fn share(db: &Persistent, id: &str, device: &str, target: Option<&str>) ->
    Result<PlaylistView, AppError> {
    let target = target.map(str::trim).filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::MissingInput("device_id is required".to_string()))?;
    let mut playlist = load_as_member(db, id, device).await?;

    if !playlist.is_member(target) {
        playlist.access.push(target.to_string());
        db.save_access(&playlist.id, &playlist.access).await?;
        info!(playlist_id = %playlist.id, with = target, "playlist.shared");
    }
    view(db, playlist, device).await
}

pub async fn leave(db: &Persistent, id: &str, device: &str) -> Result<(), AppError> {
    let mut playlist = load(db, id).await?;
    if playlist.is_owner(device) {
        return Err(AppError::BadRequest("The owner cannot leave their own playlist".to_string()));
    }
    if !playlist.is_member(device) {
        return Err(AppError::BadRequest("You are not a member of this playlist".to_string()));
    }

    playlist.access.retain(|d| d != device);
    db.save_access(&playlist.id, &playlist.access).await?;
    info!(playlist_id = %playlist.id, device, "playlist.left");
    Ok(())
}

fn refers_to(track: &TrackRef, song: &Song) -> bool {
    match track {
        TrackRef::Ref(id) => id == &song.id,
        TrackRef::Legacy { isrc, .. } => song.isrc.as_deref() == Some(isrc.as_str()),
    }
}

/// Returns the playlist and whether the song was appended
pub async fn add_song(db: &Persistent, id: &str, device: &str, song_id: &str) ->
    Result<(PlaylistView, bool), AppError> {
    let mut playlist = load_as_member(db, id, device).await?;
    parse_id(song_id, "song")?;
    let song = db.find_song(song_id).await?
        .ok_or_else(|| AppError::NotFound("Song not found".to_string()))?;

    let added = !playlist.tracks.iter().any(|t| refers_to(t, &song));
    if added {
        playlist.tracks.push(TrackRef::Ref(song.id.clone()));
        db.save_tracks(&playlist.id, &playlist.tracks).await?;
        info!(playlist_id = %playlist.id, song_id = %song.id, "playlist.track_added");
    }
    Ok(( view(db, playlist, device).await?, added ))
}

pub async fn remove_song(db: &Persistent, id: &str, device: &str, song_id: &str) ->
    Result<PlaylistView, AppError> {
    let mut playlist = load_as_owner(db, id, device).await?;
    parse_id(song_id, "song")?;

    let before = playlist.tracks.len();
    match db.find_song(song_id).await? {
        Some(song) => playlist.tracks.retain(|t| !refers_to(t, &song)),
        None => playlist.tracks.retain(|t| t != &TrackRef::Ref(song_id.to_string())),
    }
    if playlist.tracks.len() == before {
        return Err(AppError::NotFound("Song is not in this playlist".to_string()));
    }

    db.save_tracks(&playlist.id, &playlist.tracks).await?;
    info!(playlist_id = %playlist.id, song_id, "playlist.track_removed");
    view(db, playlist, device).await
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub seed_artist: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub cover_url: Option<String>,
    pub spotify_id: Option<String>,
    pub spotify_url: Option<String>,
    pub isrc: Option<String>,
    pub local_song_id: Option<String>,
    /// Caller's playlists that already hold the local song
    pub in_playlists: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForYou {
    pub seeds: Vec<String>,
    pub tracks: Vec<Recommendation>,
}

async fn cross_reference(
    db: &Persistent,
    playlists: &[Playlist],
    seed: &str,
    track: CatalogTrack
) -> Result<Recommendation, AppError> {
    let local = match track.isrc.as_deref() {
        Some(isrc) => db.find_song_by_isrc(isrc).await?,
        None => None,
    };
    let in_playlists = local.as_ref()
        .map(|song| playlists.iter()
            .filter(|p| p.tracks.iter().any(|t| refers_to(t, song)))
            .map(|p| p.id.clone())
            .collect())
        .unwrap_or_default();

    Ok( Recommendation {
        seed_artist: seed.to_string(),
        title: track.title,
        artists: track.artists,
        album: track.album,
        cover_url: track.album_image,
        spotify_id: track.spotify_id,
        spotify_url: track.spotify_url,
        isrc: track.isrc,
        local_song_id: local.map(|s| s.id),
        in_playlists,
    })
}

/// Catalog tracks by the caller's most recent history artists, cross
/// referenced against the local store
pub async fn for_you(db: &Persistent, catalog: &dyn Catalog, device: &str) ->
    Result<ForYou, AppError> {
    let Some(user) = db.find_user_by_device(device).await? else {
        return Ok(ForYou::default());
    };

    let seeds: Vec<String> = db.history_artists(&user).await?
        .into_iter()
        .map(|a| a.name)
        .take(FOR_YOU_SEEDS)
        .collect();
    if seeds.is_empty() {
        return Ok(ForYou::default());
    }

    let searches = join_all(seeds.iter().map(|name| async move {
        let query = format!("artist:\"{name}\"");
        (name, catalog.search_tracks(&query, FOR_YOU_PER_SEED).await)
    })).await;

    let playlists = db.playlists_for_device(device).await?;
    let mut seen: Vec<String> = Vec::new();
    let mut tracks = Vec::new();
    for (seed, result) in searches {
        let found = match result {
            Ok(found) => found,
            Err(e) => {
                warn!(seed = %seed, error = %e, "for_you.seed_failed");
                continue;
            }
        };
        for track in found {
            // the same track can come back under two seeds
            let key = track.spotify_id.clone().unwrap_or_else(|| track.title.clone());
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            tracks.push(cross_reference(db, &playlists, seed, track).await?);
        }
    }

    info!(device, seeds = seeds.len(), tracks = tracks.len(), "for_you.built");
    Ok( ForYou { seeds, tracks } )
}
