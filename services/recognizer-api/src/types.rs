//!
//! src/types.rs
//!
//! Records kept in the store and the views handed back to devices
//!

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingLinks {
    #[serde(default)]
    pub spotify: String,
    #[serde(default)]
    pub apple_music: String,
    #[serde(default)]
    pub youtube: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub isrc: Option<String>,
    pub spotify_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub artist_ids: Vec<String>,
    pub album: String,
    pub cover_url: String,
    pub duration_ms: Option<i64>,
    pub links: StreamingLinks,
    pub spotify_uri: Option<String>,
    pub preview_url: String,
    pub genre: String,
    pub release_date: Option<String>,
    pub popularity: Option<i64>,
    pub created_at: i64,
}

/// Song fields before the store assigns an id
#[derive(Debug, Clone, Default)]
pub struct NewSong {
    pub isrc: Option<String>,
    pub spotify_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub artist_ids: Vec<String>,
    pub album: String,
    pub cover_url: String,
    pub duration_ms: Option<i64>,
    pub links: StreamingLinks,
    pub spotify_uri: Option<String>,
    pub preview_url: String,
    pub genre: String,
    pub release_date: Option<String>,
    pub popularity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub spotify_id: Option<String>,
    pub name: String,
    pub image_url: String,
    pub spotify_url: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewArtist {
    pub spotify_id: Option<String>,
    pub name: String,
    pub image_url: String,
    pub spotify_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub device_id: String,
    pub is_anonymous: bool,
    pub history: Vec<String>,
    pub created_at: i64,
}

/// A stored playlist entry. Older rows hold an `{isrc, name}` object, newer
/// rows a bare song id; both decode here and nowhere else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackRef {
    Legacy {
        isrc: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        name: String
    },
    Ref(String),
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub owner_device: String,
    pub access: Vec<String>,
    pub tracks: Vec<TrackRef>,
}

impl Playlist {
    pub fn is_owner(&self, device: &str) -> bool {
        self.owner_device == device
    }

    pub fn is_member(&self, device: &str) -> bool {
        self.access.iter().any(|d| d == device)
    }
}

/// Song as returned to devices, artist name and image resolved from the
/// stored artist records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongView {
    #[serde(flatten)]
    pub song: Song,
    pub artist_name: String,
    pub artist_image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistView {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub owner_device: String,
    pub is_owner: bool,
    pub members: usize,
    pub tracks: Vec<SongView>,
}
