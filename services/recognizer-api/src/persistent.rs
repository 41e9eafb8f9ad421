//!
//! src/persistent.rs
//!
//! Sqlite store for songs, artists, users and playlists. List valued
//! attributes are kept as json text columns. Lookup columns carry plain
//! indexes only; dedup is the caller's check-then-insert
//!

use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite
};
use uuid::Uuid;

use crate::errors::AppError;
use crate::types::{
    Artist, NewArtist, NewSong, Playlist, Song, SongView, StreamingLinks, TrackRef, User
};

const SONG_COLUMNS: &str = r"
    id, isrc, spotify_id, title, artist, artist_ids, album, cover_url,
    duration_ms, spotify_url, apple_music_url, youtube_url, spotify_uri,
    preview_url, genre, release_date, popularity, created_at
";

pub struct Persistent {
    pool: Pool<Sqlite>
}

fn decode_list<T: serde::de::DeserializeOwned>(raw: &str) -> Result<Vec<T>, AppError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok( serde_json::from_str(raw)? )
}

fn song_from_row(row: &SqliteRow) -> Result<Song, AppError> {
    Ok( Song {
        id:           row.get("id"),
        isrc:         row.get("isrc"),
        spotify_id:   row.get("spotify_id"),
        title:        row.get("title"),
        artist:       row.get("artist"),
        artist_ids:   decode_list(&row.get::<String, _>("artist_ids"))?,
        album:        row.get("album"),
        cover_url:    row.get("cover_url"),
        duration_ms:  row.get("duration_ms"),
        links: StreamingLinks {
            spotify:     row.get("spotify_url"),
            apple_music: row.get("apple_music_url"),
            youtube:     row.get("youtube_url"),
        },
        spotify_uri:  row.get("spotify_uri"),
        preview_url:  row.get("preview_url"),
        genre:        row.get("genre"),
        release_date: row.get("release_date"),
        popularity:   row.get("popularity"),
        created_at:   row.get("created_at"),
    })
}

fn artist_from_row(row: &SqliteRow) -> Artist {
    Artist {
        id:          row.get("id"),
        spotify_id:  row.get("spotify_id"),
        name:        row.get("name"),
        image_url:   row.get("image_url"),
        spotify_url: row.get("spotify_url"),
        created_at:  row.get("created_at"),
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    Ok( User {
        id:           row.get("id"),
        device_id:    row.get("device_id"),
        is_anonymous: row.get::<i64, _>("is_anonymous") != 0,
        history:      decode_list(&row.get::<String, _>("history"))?,
        created_at:   row.get("created_at"),
    })
}

fn playlist_from_row(row: &SqliteRow) -> Result<Playlist, AppError> {
    Ok( Playlist {
        id:           row.get("id"),
        name:         row.get("name"),
        created_at:   row.get("created_at"),
        owner_device: row.get("owner_device"),
        access:       decode_list(&row.get::<String, _>("access"))?,
        tracks:       decode_list(&row.get::<String, _>("tracks"))?,
    })
}

impl Persistent {

    async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), AppError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS songs (
              id               TEXT PRIMARY KEY,
              isrc             TEXT,
              spotify_id       TEXT,
              title            TEXT NOT NULL,
              artist           TEXT NOT NULL,
              artist_ids       TEXT NOT NULL DEFAULT '[]',
              album            TEXT NOT NULL,
              cover_url        TEXT NOT NULL DEFAULT '',
              duration_ms      INTEGER,
              spotify_url      TEXT NOT NULL DEFAULT '',
              apple_music_url  TEXT NOT NULL DEFAULT '',
              youtube_url      TEXT NOT NULL DEFAULT '',
              spotify_uri      TEXT,
              preview_url      TEXT NOT NULL DEFAULT '',
              genre            TEXT NOT NULL,
              release_date     TEXT,
              popularity       INTEGER,
              created_at       INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS artists (
              id           TEXT PRIMARY KEY,
              spotify_id   TEXT,
              name         TEXT NOT NULL,
              image_url    TEXT NOT NULL DEFAULT '',
              spotify_url  TEXT NOT NULL DEFAULT '',
              created_at   INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
              id            TEXT PRIMARY KEY,
              device_id     TEXT NOT NULL,
              is_anonymous  INTEGER NOT NULL DEFAULT 1,
              history       TEXT NOT NULL DEFAULT '[]',
              created_at    INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS playlists (
              id            TEXT PRIMARY KEY,
              name          TEXT NOT NULL,
              owner_device  TEXT NOT NULL,
              access        TEXT NOT NULL DEFAULT '[]',
              tracks        TEXT NOT NULL DEFAULT '[]',
              created_at    INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_songs_isrc ON songs(isrc);")
            .execute(pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_songs_spotify ON songs(spotify_id);")
            .execute(pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artists_name ON artists(name);")
            .execute(pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_device ON users(device_id);")
            .execute(pool).await?;

        Ok(())
    }

    pub async fn init(database_url: &str) -> Result<Self, AppError> {
        let is_memory = database_url == "sqlite::memory:";

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        // WAL is file-only
        if !is_memory {
            opts = opts.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                       .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory {1} else {8})
            .connect_with(opts)
            .await?;

        Self::ensure_schema(&pool).await?;

        Ok( Self { pool } )
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /*
     * Songs
     */

    pub async fn find_song(&self, id: &str) -> Result<Option<Song>, AppError> {
        let row = sqlx::query(&format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = ?1;"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(song_from_row).transpose()
    }

    pub async fn find_song_by_isrc(&self, isrc: &str) -> Result<Option<Song>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {SONG_COLUMNS} FROM songs WHERE isrc = ?1 ORDER BY created_at ASC LIMIT 1;"
        ))
        .bind(isrc)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(song_from_row).transpose()
    }

    pub async fn find_song_by_spotify_id(&self, spotify_id: &str) ->
        Result<Option<Song>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {SONG_COLUMNS} FROM songs WHERE spotify_id = ?1 ORDER BY created_at ASC LIMIT 1;"
        ))
        .bind(spotify_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(song_from_row).transpose()
    }

    pub async fn insert_song(&self, song: NewSong) -> Result<Song, AppError> {
        let id  = Uuid::new_v4().to_string();
        let now = Self::now();

        sqlx::query(
            r"
            INSERT INTO songs (
                id, isrc, spotify_id, title, artist, artist_ids, album, cover_url,
                duration_ms, spotify_url, apple_music_url, youtube_url, spotify_uri,
                preview_url, genre, release_date, popularity, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18);
            "
        )
        .bind(&id)
        .bind(song.isrc.as_ref())
        .bind(song.spotify_id.as_ref())
        .bind(&song.title)
        .bind(&song.artist)
        .bind(serde_json::to_string(&song.artist_ids)?)
        .bind(&song.album)
        .bind(&song.cover_url)
        .bind(song.duration_ms)
        .bind(&song.links.spotify)
        .bind(&song.links.apple_music)
        .bind(&song.links.youtube)
        .bind(song.spotify_uri.as_ref())
        .bind(&song.preview_url)
        .bind(&song.genre)
        .bind(song.release_date.as_ref())
        .bind(song.popularity)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok( Song {
            id,
            isrc: song.isrc,
            spotify_id: song.spotify_id,
            title: song.title,
            artist: song.artist,
            artist_ids: song.artist_ids,
            album: song.album,
            cover_url: song.cover_url,
            duration_ms: song.duration_ms,
            links: song.links,
            spotify_uri: song.spotify_uri,
            preview_url: song.preview_url,
            genre: song.genre,
            release_date: song.release_date,
            popularity: song.popularity,
            created_at: now,
        })
    }

    /// Songs without a popularity score sort last
    pub async fn top_songs(&self, limit: u32) -> Result<Vec<Song>, AppError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {SONG_COLUMNS} FROM songs
            ORDER BY COALESCE(popularity, -1) DESC, created_at ASC
            LIMIT ?1;
            "
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(song_from_row).collect()
    }

    #[cfg(test)]
    pub async fn count_songs(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM songs;")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn resolve_track(&self, track: &TrackRef) -> Result<Option<Song>, AppError> {
        match track {
            TrackRef::Ref(id)            => self.find_song(id).await,
            TrackRef::Legacy { isrc, .. } => self.find_song_by_isrc(isrc).await,
        }
    }

    /*
     * Artists
     */

    pub async fn find_artist(&self, id: &str) -> Result<Option<Artist>, AppError> {
        let row = sqlx::query(
            "SELECT id, spotify_id, name, image_url, spotify_url, created_at
               FROM artists WHERE id = ?1;"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok( row.as_ref().map(artist_from_row) )
    }

    pub async fn find_artist_by_name(&self, name: &str) -> Result<Option<Artist>, AppError> {
        let row = sqlx::query(
            "SELECT id, spotify_id, name, image_url, spotify_url, created_at
               FROM artists WHERE name = ?1 ORDER BY created_at ASC LIMIT 1;"
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok( row.as_ref().map(artist_from_row) )
    }

    pub async fn insert_artist(&self, artist: NewArtist) -> Result<Artist, AppError> {
        let id  = Uuid::new_v4().to_string();
        let now = Self::now();

        sqlx::query(
            r"
            INSERT INTO artists (id, spotify_id, name, image_url, spotify_url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6);
            "
        )
        .bind(&id)
        .bind(artist.spotify_id.as_ref())
        .bind(&artist.name)
        .bind(&artist.image_url)
        .bind(&artist.spotify_url)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok( Artist {
            id,
            spotify_id: artist.spotify_id,
            name: artist.name,
            image_url: artist.image_url,
            spotify_url: artist.spotify_url,
            created_at: now,
        })
    }

    #[cfg(test)]
    pub async fn count_artists(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM artists;")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Attaches the stored artist name and image. Falls back to the song's
    /// own display string when none of its artist ids resolve
    pub async fn song_view(&self, song: Song) -> Result<SongView, AppError> {
        let mut artists = Vec::with_capacity(song.artist_ids.len());
        for id in &song.artist_ids {
            if let Some(artist) = self.find_artist(id).await? {
                artists.push(artist);
            }
        }

        let artist_name = if artists.is_empty() {
            song.artist.clone()
        } else {
            artists.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ")
        };
        let artist_image = artists.first().map(|a| a.image_url.clone()).unwrap_or_default();

        Ok( SongView { song, artist_name, artist_image } )
    }

    /*
     * Users
     */

    pub async fn find_user_by_device(&self, device_id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query(
            "SELECT id, device_id, is_anonymous, history, created_at
               FROM users WHERE device_id = ?1 ORDER BY created_at ASC LIMIT 1;"
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Returns the user and whether it was created by this call
    pub async fn ensure_user(&self, device_id: &str) -> Result<(User, bool), AppError> {
        if let Some(existing) = self.find_user_by_device(device_id).await? {
            return Ok((existing, false));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            is_anonymous: true,
            history: Vec::new(),
            created_at: Self::now(),
        };
        sqlx::query(
            r"
            INSERT INTO users (id, device_id, is_anonymous, history, created_at)
            VALUES (?1, ?2, 1, '[]', ?3);
            "
        )
        .bind(&user.id)
        .bind(&user.device_id)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok((user, true))
    }

    async fn write_history(&self, user_id: &str, history: &[String]) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET history = ?1 WHERE id = ?2;")
            .bind(serde_json::to_string(history)?)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// False when the song was already in the history
    pub async fn append_history(&self, user: &User, song_id: &str) -> Result<bool, AppError> {
        if user.history.iter().any(|s| s == song_id) {
            return Ok(false);
        }
        let mut history = user.history.clone();
        history.push(song_id.to_string());
        self.write_history(&user.id, &history).await?;
        Ok(true)
    }

    /// False when the song was not in the history
    pub async fn remove_history(&self, user: &User, song_id: &str) -> Result<bool, AppError> {
        let history: Vec<String> = user.history.iter()
            .filter(|s| s.as_str() != song_id)
            .cloned()
            .collect();
        if history.len() == user.history.len() {
            return Ok(false);
        }
        self.write_history(&user.id, &history).await?;
        Ok(true)
    }

    pub async fn clear_history(&self, user: &User) -> Result<(), AppError> {
        self.write_history(&user.id, &[]).await
    }

    /// History songs newest first, ids that no longer resolve are dropped
    pub async fn history_songs(&self, user: &User) -> Result<Vec<Song>, AppError> {
        let mut songs = Vec::with_capacity(user.history.len());
        for id in user.history.iter().rev() {
            if let Some(song) = self.find_song(id).await? {
                songs.push(song);
            }
        }
        Ok(songs)
    }

    /// Distinct artists credited on the history songs, most recent first
    pub async fn history_artists(&self, user: &User) -> Result<Vec<Artist>, AppError> {
        let mut artists: Vec<Artist> = Vec::new();
        for song in self.history_songs(user).await? {
            for id in &song.artist_ids {
                if artists.iter().any(|a| &a.id == id) {
                    continue;
                }
                if let Some(artist) = self.find_artist(id).await? {
                    artists.push(artist);
                }
            }
        }
        Ok(artists)
    }

    /*
     * Playlists
     */

    pub async fn create_playlist(&self, name: &str, owner_device: &str) ->
        Result<Playlist, AppError> {
        let playlist = Playlist {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Self::now(),
            owner_device: owner_device.to_string(),
            access: vec![owner_device.to_string()],
            tracks: Vec::new(),
        };

        sqlx::query(
            r"
            INSERT INTO playlists (id, name, owner_device, access, tracks, created_at)
            VALUES (?1, ?2, ?3, ?4, '[]', ?5);
            "
        )
        .bind(&playlist.id)
        .bind(&playlist.name)
        .bind(&playlist.owner_device)
        .bind(serde_json::to_string(&playlist.access)?)
        .bind(playlist.created_at)
        .execute(&self.pool)
        .await?;

        Ok(playlist)
    }

    pub async fn find_playlist(&self, id: &str) -> Result<Option<Playlist>, AppError> {
        let row = sqlx::query(
            "SELECT id, name, owner_device, access, tracks, created_at
               FROM playlists WHERE id = ?1;"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(playlist_from_row).transpose()
    }

    /// Every playlist whose access list carries the device, newest first
    pub async fn playlists_for_device(&self, device_id: &str) ->
        Result<Vec<Playlist>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT p.id, p.name, p.owner_device, p.access, p.tracks, p.created_at
              FROM playlists p
             WHERE EXISTS (
                SELECT 1 FROM json_each(p.access) a WHERE a.value = ?1
             )
             ORDER BY p.created_at DESC, p.id ASC;
            "
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(playlist_from_row).collect()
    }

    /// Whole-array write, the last writer wins
    pub async fn save_tracks(&self, id: &str, tracks: &[TrackRef]) -> Result<(), AppError> {
        sqlx::query("UPDATE playlists SET tracks = ?1 WHERE id = ?2;")
            .bind(serde_json::to_string(tracks)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn save_access(&self, id: &str, access: &[String]) -> Result<(), AppError> {
        sqlx::query("UPDATE playlists SET access = ?1 WHERE id = ?2;")
            .bind(serde_json::to_string(access)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_playlist(&self, id: &str) -> Result<bool, AppError> {
        let deleted = sqlx::query("DELETE FROM playlists WHERE id = ?1;")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}
