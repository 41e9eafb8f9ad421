//!
//! src/recognize.rs
//!
//! Recognition enrichment pipeline. Fingerprint match first, then best
//! effort catalog enrichment, then the song and artist inserts
//!

use serde_json::Value;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::fetch::AudioClip;
use crate::persistent::Persistent;
use crate::providers::{Catalog, CatalogTrack, Enrichment, Providers};
use crate::types::{Artist, NewArtist, NewSong, SongView, StreamingLinks};

pub const NO_AUDIO: &str = "No audio file provided";

const UNKNOWN_TITLE: &str = "Unknown";
const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_GENRE: &str = "Unknown";
const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Fields read off the recognition provider's track object
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedTrack {
    pub isrc: Option<String>,
    pub title: String,
    pub subtitle: String,
    pub cover_url: String,
    pub genre: String,
    pub apple_music_id: String,
    pub preview_url: String,
}

fn text(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl RecognizedTrack {
    pub fn new(track: &Value) -> Self {
        let actions: &[Value] = track.pointer("/hub/actions")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let apple_music_id = actions.iter()
            .find(|a| {
                let kind = a.get("type").and_then(|v| v.as_str());
                let name = a.get("name").and_then(|v| v.as_str());
                kind == Some("applemusicplay") || (name == Some("apple") && a.get("id").is_some())
            })
            .and_then(|a| a.get("id"))
            .map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();

        let preview_url = actions.iter()
            .find(|a| {
                let kind = a.get("type").and_then(|v| v.as_str());
                let name = a.get("name").and_then(|v| v.as_str()).unwrap_or("");
                kind == Some("uri") || name.contains("preview")
            })
            .and_then(|a| text(a, "/uri"))
            .unwrap_or_default();

        Self {
            isrc: text(track, "/isrc"),
            title: text(track, "/title").unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            subtitle: text(track, "/subtitle").unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            cover_url: text(track, "/images/coverarthq")
                .or_else(|| text(track, "/images/coverart"))
                .or_else(|| text(track, "/images/background"))
                .unwrap_or_default(),
            genre: text(track, "/genres/primary").unwrap_or_else(|| UNKNOWN_GENRE.to_string()),
            apple_music_id,
            preview_url,
        }
    }
}

/// The matched track sits at the top level or under `result`
pub fn matched_track(response: &Value) -> Option<&Value> {
    response.get("track")
        .or_else(|| response.pointer("/result/track"))
        .filter(|t| t.is_object())
}

/// Splits an artist credit on `&` and `,`, dropping blanks and repeats
pub fn split_artists(subtitle: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for piece in subtitle.split(['&', ',']) {
        let name = piece.trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Finds each artist by name, inserting (with best effort catalog data)
/// any that are missing. Order follows `names`
pub async fn resolve_artists(
    db: &Persistent,
    catalog: &dyn Catalog,
    names: &[String]
) -> Result<Vec<Artist>, AppError> {
    let mut artists = Vec::with_capacity(names.len());
    for name in names {
        if let Some(existing) = db.find_artist_by_name(name).await? {
            artists.push(existing);
            continue;
        }

        let enriched = Enrichment::from_lookup(catalog.artist_by_name(name).await)
            .settle("artist_by_name", name);
        let fields = match enriched {
            Some(found) => NewArtist {
                spotify_id: found.spotify_id,
                name: name.clone(),
                image_url: found.image_url.unwrap_or_default(),
                spotify_url: found.spotify_url.unwrap_or_default(),
            },
            None => NewArtist { name: name.clone(), ..NewArtist::default() },
        };
        let artist = db.insert_artist(fields).await?;
        info!(artist_id = %artist.id, name = %artist.name, "artist.created");
        artists.push(artist);
    }
    Ok(artists)
}

pub fn apple_music_link(id: &str) -> String {
    if id.is_empty() {
        String::new()
    } else {
        format!("https://music.apple.com/song/{id}")
    }
}

pub fn youtube_link(title: &str, artist: &str) -> String {
    let query = format!("{title} {artist}");
    url::Url::parse_with_params("https://www.youtube.com/results", &[("search_query", query.trim())])
        .map(String::from)
        .unwrap_or_default()
}

/// Appends to the device's history if it belongs to a known user. Never fails
pub async fn record_history(db: &Persistent, device: Option<&str>, song_id: &str) {
    let Some(device) = device else { return };

    let outcome = match db.find_user_by_device(device).await {
        Ok(Some(user)) => db.append_history(&user, song_id).await.map(|_| ()),
        Ok(None) => return,
        Err(e) => Err(e),
    };
    if let Err(e) = outcome {
        warn!(device, song_id, error = %e, "history.append_failed");
    }
}

#[derive(Debug)]
pub struct Recognition {
    pub view: SongView,
    pub created: bool,
}

/// Merges recognition output with the catalog track, catalog values win
fn merge(recognized: &RecognizedTrack, catalog: Option<CatalogTrack>, artist_ids: Vec<String>) -> NewSong {
    let catalog = catalog.unwrap_or_default();

    let cover_url = if recognized.cover_url.is_empty() {
        catalog.album_image.clone().unwrap_or_default()
    } else {
        recognized.cover_url.clone()
    };

    NewSong {
        isrc: recognized.isrc.clone(),
        spotify_id: catalog.spotify_id,
        title: recognized.title.clone(),
        artist: recognized.subtitle.clone(),
        artist_ids,
        album: catalog.album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        cover_url,
        duration_ms: catalog.duration_ms,
        links: StreamingLinks {
            spotify: catalog.spotify_url.unwrap_or_default(),
            apple_music: apple_music_link(&recognized.apple_music_id),
            youtube: youtube_link(&recognized.title, &recognized.subtitle),
        },
        spotify_uri: catalog.uri,
        preview_url: recognized.preview_url.clone(),
        genre: recognized.genre.clone(),
        release_date: catalog.release_date,
        popularity: catalog.popularity,
    }
}

pub async fn recognize(
    db: &Persistent,
    providers: &Providers,
    clip: Option<AudioClip>,
    device: Option<&str>
) -> Result<Recognition, AppError> {
    let clip = clip
        .filter(|c| !c.bytes.is_empty())
        .ok_or_else(|| AppError::MissingInput(NO_AUDIO.to_string()))?;

    info!(bytes = clip.bytes.len(), device = device.unwrap_or(""), "recognize.start");
    let response = providers.recognizer.recognize(clip).await?;
    let track = matched_track(&response)
        .ok_or_else(|| AppError::NotFound("No matching track found".to_string()))?;
    let recognized = RecognizedTrack::new(track);

    if let Some(isrc) = recognized.isrc.as_deref() {
        if let Some(existing) = db.find_song_by_isrc(isrc).await? {
            info!(song_id = %existing.id, isrc, "recognize.existing");
            record_history(db, device, &existing.id).await;
            let view = db.song_view(existing).await?;
            return Ok( Recognition { view, created: false } );
        }
    }

    let catalog = match recognized.isrc.as_deref() {
        Some(isrc) => Enrichment::from_lookup(providers.catalog.track_by_isrc(isrc).await)
            .settle("track_by_isrc", isrc),
        None => None,
    };

    let names   = split_artists(&recognized.subtitle);
    let artists = resolve_artists(db, providers.catalog.as_ref(), &names).await?;
    let ids     = artists.into_iter().map(|a| a.id).collect();

    let song = db.insert_song(merge(&recognized, catalog, ids)).await?;
    info!(song_id = %song.id, isrc = song.isrc.as_deref().unwrap_or(""), "recognize.stored");

    record_history(db, device, &song.id).await;
    let view = db.song_view(song).await?;
    Ok( Recognition { view, created: true } )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::persistent::tests::memory;
    use crate::providers::{testing::*, CatalogArtist};

    fn clip() -> Option<AudioClip> {
        Some(AudioClip {
            bytes: vec![1, 2, 3, 4],
            file_name: "clip.m4a".into(),
            content_type: "audio/mp4".into(),
        })
    }

    fn shazam_track() -> Value {
        json!({
            "title": "Sunflower",
            "subtitle": "Post Malone & Swae Lee",
            "isrc": "USUM71814888",
            "images": { "coverart": "https://img/cover", "background": "https://img/bg" },
            "genres": { "primary": "Hip-Hop/Rap" },
            "hub": {
                "actions": [
                    { "name": "apple", "type": "applemusicplay", "id": "1445912442" },
                    { "name": "apple", "type": "uri", "uri": "https://audio/preview.m4a" }
                ]
            }
        })
    }

    #[test]
    fn recognized_track_defaults_and_fallbacks() {
        let bare = RecognizedTrack::new(&json!({}));
        assert_eq!(bare.title, "Unknown");
        assert_eq!(bare.subtitle, "Unknown Artist");
        assert_eq!(bare.genre, "Unknown");
        assert_eq!(bare.cover_url, "");
        assert_eq!(bare.apple_music_id, "");
        assert_eq!(bare.preview_url, "");
        assert_eq!(bare.isrc, None);

        let full = RecognizedTrack::new(&shazam_track());
        assert_eq!(full.cover_url, "https://img/cover");
        assert_eq!(full.apple_music_id, "1445912442");
        assert_eq!(full.preview_url, "https://audio/preview.m4a");

        let bg_only = RecognizedTrack::new(&json!({ "images": { "background": "https://img/bg" } }));
        assert_eq!(bg_only.cover_url, "https://img/bg");
    }

    #[test]
    fn matched_track_accepts_both_layouts() {
        assert!(matched_track(&json!({ "track": { "title": "x" } })).is_some());
        assert!(matched_track(&json!({ "result": { "track": { "title": "x" } } })).is_some());
        assert!(matched_track(&json!({ "matches": [] })).is_none());
    }

    #[test]
    fn split_artists_drops_empty_segments() {
        assert_eq!(split_artists("Artist One & Artist Two"), vec!["Artist One", "Artist Two"]);
        assert_eq!(split_artists("A, B & "), vec!["A", "B"]);
        assert_eq!(split_artists(" & ,"), Vec::<String>::new());
        assert_eq!(split_artists("A & A, B"), vec!["A", "B"]);
    }

    #[test]
    fn links_are_built_from_recognition() {
        assert_eq!(apple_music_link(""), "");
        assert_eq!(apple_music_link("123"), "https://music.apple.com/song/123");
        assert_eq!(
            youtube_link("Sunflower", "Post Malone"),
            "https://www.youtube.com/results?search_query=Sunflower+Post+Malone"
        );
    }

    #[tokio::test]
    async fn missing_or_empty_audio_is_rejected() {
        let db = memory().await;
        let providers = quiet();

        let err = recognize(&db, &providers, None, None).await.unwrap_err();
        assert!(matches!(err, AppError::MissingInput(ref m) if m.contains(NO_AUDIO)));

        let empty = Some(AudioClip { bytes: vec![], file_name: "a".into(), content_type: "audio/mp4".into() });
        let err = recognize(&db, &providers, empty, None).await.unwrap_err();
        assert!(matches!(err, AppError::MissingInput(_)));
    }

    #[tokio::test]
    async fn no_match_is_not_found() {
        let db = memory().await;
        let providers = providers(
            FakeRecognizer::new(|| Ok(json!({ "matches": [] }))),
            FakeCatalog::default(),
            FakeEvents::new(|| Ok(json!({}))),
        );
        let err = recognize(&db, &providers, clip(), None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn new_recognition_merges_catalog_and_creates_two_artists() {
        let db = memory().await;
        let mut catalog = FakeCatalog::default();
        catalog.tracks.insert("USUM71814888".into(), CatalogTrack {
            spotify_id: Some("3KkXRkHbMCARz0aVfEt68P".into()),
            album: Some("Spider-Man: Into the Spider-Verse".into()),
            duration_ms: Some(158040),
            spotify_url: Some("https://open.spotify.com/track/3KkXRkHbMCARz0aVfEt68P".into()),
            uri: Some("spotify:track:3KkXRkHbMCARz0aVfEt68P".into()),
            popularity: Some(85),
            ..CatalogTrack::default()
        });
        catalog.artists.insert("Post Malone".into(), CatalogArtist {
            name: "Post Malone".into(),
            image_url: Some("https://img/post".into()),
            ..CatalogArtist::default()
        });
        let providers = providers(
            FakeRecognizer::track(shazam_track()),
            catalog,
            FakeEvents::new(|| Ok(json!({}))),
        );

        let out = recognize(&db, &providers, clip(), None).await.unwrap();
        assert!(out.created);
        let song = &out.view.song;
        assert_eq!(song.album, "Spider-Man: Into the Spider-Verse");
        assert_eq!(song.duration_ms, Some(158040));
        assert_eq!(song.links.apple_music, "https://music.apple.com/song/1445912442");
        assert_eq!(song.cover_url, "https://img/cover");
        assert_eq!(song.artist_ids.len(), 2);
        assert_ne!(song.artist_ids[0], song.artist_ids[1]);

        let first = db.find_artist(&song.artist_ids[0]).await.unwrap().unwrap();
        let second = db.find_artist(&song.artist_ids[1]).await.unwrap().unwrap();
        assert_eq!(first.name, "Post Malone");
        assert_eq!(first.image_url, "https://img/post");
        assert_eq!(second.name, "Swae Lee");
        assert_eq!(out.view.artist_name, "Post Malone, Swae Lee");
    }

    #[tokio::test]
    async fn catalog_outage_degrades_to_recognition_defaults() {
        let db = memory().await;
        let catalog = FakeCatalog { down: true, ..FakeCatalog::default() };
        let providers = providers(
            FakeRecognizer::track(shazam_track()),
            catalog,
            FakeEvents::new(|| Ok(json!({}))),
        );

        let out = recognize(&db, &providers, clip(), None).await.unwrap();
        assert!(out.created);
        assert_eq!(out.view.song.album, "Unknown Album");
        assert_eq!(out.view.song.links.spotify, "");
        assert_eq!(out.view.song.duration_ms, None);
        assert_eq!(db.count_artists().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn known_isrc_returns_stored_song_without_insert() {
        let db = memory().await;
        let stored_artist = db.insert_artist(NewArtist {
            name: "Stored Name".into(),
            ..NewArtist::default()
        }).await.unwrap();
        let mut fields = crate::persistent::tests::new_song("Sunflower", Some("USUM71814888"));
        fields.artist_ids = vec![stored_artist.id.clone()];
        let stored = db.insert_song(fields).await.unwrap();
        let (user, _) = db.ensure_user("device-a").await.unwrap();
        assert!(user.history.is_empty());

        let catalog = FakeCatalog::default();
        let providers = providers(
            FakeRecognizer::track(shazam_track()),
            catalog,
            FakeEvents::new(|| Ok(json!({}))),
        );
        let out = recognize(&db, &providers, clip(), Some("device-a")).await.unwrap();

        assert!(!out.created);
        assert_eq!(out.view.song.id, stored.id);
        assert_eq!(out.view.artist_name, "Stored Name");
        assert_eq!(db.count_songs().await.unwrap(), 1);
        assert_eq!(db.count_artists().await.unwrap(), 1);

        let user = db.find_user_by_device("device-a").await.unwrap().unwrap();
        assert_eq!(user.history, vec![stored.id]);
    }

    #[tokio::test]
    async fn existing_artists_are_reused_by_name() {
        let db = memory().await;
        let existing = db.insert_artist(NewArtist {
            name: "Swae Lee".into(),
            ..NewArtist::default()
        }).await.unwrap();

        let catalog = FakeCatalog::default();
        let names = split_artists("Post Malone & Swae Lee");
        let artists = resolve_artists(&db, &catalog, &names).await.unwrap();

        assert_eq!(artists[1].id, existing.id);
        assert_eq!(catalog.artist_calls.load(Ordering::SeqCst), 1);
        assert_eq!(db.count_artists().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recognizer_failures_propagate_with_their_kind() {
        let db = memory().await;
        let providers = providers(
            FakeRecognizer::new(|| Err(AppError::Timeout("20s".into()))),
            FakeCatalog::default(),
            FakeEvents::new(|| Ok(json!({}))),
        );
        let err = recognize(&db, &providers, clip(), None).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(db.count_songs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_device_history_is_skipped() {
        let db = memory().await;
        let providers = providers(
            FakeRecognizer::track(json!({ "title": "No Isrc", "subtitle": "Solo" })),
            FakeCatalog::default(),
            FakeEvents::new(|| Ok(json!({}))),
        );
        let out = recognize(&db, &providers, clip(), Some("stranger")).await.unwrap();
        assert!(out.created);
        assert!(db.find_user_by_device("stranger").await.unwrap().is_none());
    }
}
