//!
//! src/providers.rs
//!
//! Seams over the three third-party services. Handlers only ever see the
//! traits, the live implementations wrap the request builders in src/fetch.rs
//!

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::{sync::Mutex, time::{Duration, Instant}};
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::fetch::{AudioClip, ShazamClient, SpotifyClient, TicketmasterClient};

/// Seconds shaved off `expires_in` before a token is considered stale
const TOKEN_MARGIN_SECS: u64 = 60;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogTrack {
    pub spotify_id: Option<String>,
    pub isrc: Option<String>,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub album_image: Option<String>,
    pub duration_ms: Option<i64>,
    pub spotify_url: Option<String>,
    pub uri: Option<String>,
    pub release_date: Option<String>,
    pub popularity: Option<i64>,
}

impl CatalogTrack {
    pub fn new(track: &Value) -> Self {
        Self {
            spotify_id: track.get("id").and_then(|v| v.as_str()).map(str::to_string),
            isrc: track.pointer("/external_ids/isrc").and_then(|v| v.as_str()).map(str::to_string),
            title: track.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            artists: track.get("artists").and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter().filter_map(|a| a.get("name").and_then(|v| v.as_str()))
                       .map(str::to_string).collect()
                }).unwrap_or_default(),
            album: track.pointer("/album/name").and_then(|v| v.as_str()).map(str::to_string),
            album_image: track.pointer("/album/images/0/url").and_then(|v| v.as_str()).map(str::to_string),
            duration_ms: track.get("duration_ms").and_then(|v| v.as_i64()),
            spotify_url: track.pointer("/external_urls/spotify").and_then(|v| v.as_str()).map(str::to_string),
            uri: track.get("uri").and_then(|v| v.as_str()).map(str::to_string),
            release_date: track.pointer("/album/release_date").and_then(|v| v.as_str()).map(str::to_string),
            popularity: track.get("popularity").and_then(|v| v.as_i64()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogArtist {
    pub spotify_id: Option<String>,
    pub name: String,
    pub image_url: Option<String>,
    pub spotify_url: Option<String>,
}

impl CatalogArtist {
    pub fn new(artist: &Value) -> Self {
        Self {
            spotify_id: artist.get("id").and_then(|v| v.as_str()).map(str::to_string),
            name: artist.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            image_url: artist.pointer("/images/0/url").and_then(|v| v.as_str()).map(str::to_string),
            spotify_url: artist.pointer("/external_urls/spotify").and_then(|v| v.as_str()).map(str::to_string),
        }
    }
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Raw provider answer for one clip
    async fn recognize(&self, clip: AudioClip) -> Result<Value, AppError>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn track_by_isrc(&self, isrc: &str) -> Result<Option<CatalogTrack>, AppError>;
    async fn artist_by_name(&self, name: &str) -> Result<Option<CatalogArtist>, AppError>;
    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<CatalogTrack>, AppError>;
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Raw events listing for a keyword
    async fn events(&self, keyword: &str, country: Option<&str>, limit: u32) ->
        Result<Value, AppError>;
}

#[derive(Clone)]
pub struct Providers {
    pub recognizer: Arc<dyn Recognizer>,
    pub catalog: Arc<dyn Catalog>,
    pub events: Arc<dyn EventSource>,
}

impl Providers {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        catalog: Arc<dyn Catalog>,
        events: Arc<dyn EventSource>
    ) -> Self {
        Self { recognizer, catalog, events }
    }
}

///
/// Outcome of one best-effort enrichment attempt. Failures are kept so the
/// caller can see that a fallback happened
///
#[derive(Debug)]
pub enum Enrichment<T> {
    Found(T),
    NotFound,
    Ignored(AppError),
}

impl<T> Enrichment<T> {
    pub fn from_lookup(result: Result<Option<T>, AppError>) -> Self {
        match result {
            Ok(Some(v)) => Enrichment::Found(v),
            Ok(None)    => Enrichment::NotFound,
            Err(e)      => Enrichment::Ignored(e),
        }
    }

    /// Collapses to the found value, logging an ignored failure
    pub fn settle(self, attempt: &str, key: &str) -> Option<T> {
        match self {
            Enrichment::Found(v) => Some(v),
            Enrichment::NotFound => {
                debug!(attempt, key, "enrich.not_found");
                None
            }
            Enrichment::Ignored(e) => {
                warn!(attempt, key, error = %e, "enrich.ignored");
                None
            }
        }
    }
}

/// Pulls the provider's own error text out of a failed response body
fn upstream_message(status: StatusCode, body: &str) -> String {
    let found = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["/message", "/error/message", "/error_description", "/fault/faultstring", "/error"]
            .iter()
            .find_map(|p| v.pointer(p).and_then(|m| m.as_str()).map(str::to_string))
    });

    found
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("upstream error").to_string())
}

/// Sends once and triages the outcome, no retry
pub(crate) async fn send_json(rb: RequestBuilder) -> Result<Value, AppError> {
    let response = rb.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(AppError::Upstream {
            status: status.as_u16(),
            message: upstream_message(status, &body)
        });
    }
    Ok( serde_json::from_str(&body)? )
}

pub struct ShazamRecognizer {
    client: ShazamClient
}

impl ShazamRecognizer {
    pub fn new(client: ShazamClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Recognizer for ShazamRecognizer {
    async fn recognize(&self, clip: AudioClip) -> Result<Value, AppError> {
        debug!(bytes = clip.bytes.len(), file = %clip.file_name, "shazam.request");
        send_json(self.client.recognize(clip)?).await
    }
}

///
/// Spotify catalog. The client-credentials token is reused until shortly
/// before it expires
///
pub struct SpotifyCatalog {
    client: SpotifyClient,
    token: Mutex<Option<(String, Instant)>>
}

impl SpotifyCatalog {
    pub fn new(client: SpotifyClient) -> Self {
        Self { client, token: Mutex::new(None) }
    }

    async fn bearer(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;
        if let Some((token, expiry)) = cached.as_ref() {
            if Instant::now() < *expiry {
                return Ok(token.clone());
            }
        }

        let response = send_json(self.client.token_request()).await?;
        let token = response["access_token"].as_str()
            .ok_or_else(|| AppError::Parse("no access_token in response".into()))?
            .to_string();
        let expires_in = response["expires_in"].as_u64().unwrap_or(3600);
        let expiry = Instant::now()
            + Duration::from_secs(expires_in.saturating_sub(TOKEN_MARGIN_SECS));

        debug!(expires_in, "spotify.token");
        *cached = Some((token.clone(), expiry));
        Ok(token)
    }

    async fn search(&self, kind: &str, query: &str, limit: u32) -> Result<Value, AppError> {
        let bearer = self.bearer().await?;
        send_json(self.client.search(kind, query, limit, &bearer)?).await
    }
}

#[async_trait]
impl Catalog for SpotifyCatalog {
    async fn track_by_isrc(&self, isrc: &str) -> Result<Option<CatalogTrack>, AppError> {
        let found = self.search("track", &format!("isrc:{isrc}"), 1).await?;
        Ok( found.pointer("/tracks/items/0").map(CatalogTrack::new) )
    }

    async fn artist_by_name(&self, name: &str) -> Result<Option<CatalogArtist>, AppError> {
        let found = self.search("artist", name, 1).await?;
        Ok( found.pointer("/artists/items/0").map(CatalogArtist::new) )
    }

    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<CatalogTrack>, AppError> {
        let found = self.search("track", query, limit).await?;
        let items = found.pointer("/tracks/items")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().map(CatalogTrack::new).collect())
            .unwrap_or_default();
        Ok(items)
    }
}

pub struct TicketmasterEvents {
    client: TicketmasterClient
}

impl TicketmasterEvents {
    pub fn new(client: TicketmasterClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventSource for TicketmasterEvents {
    async fn events(&self, keyword: &str, country: Option<&str>, limit: u32) ->
        Result<Value, AppError> {
        send_json(self.client.events(keyword, country, limit)?).await
    }
}

/// Stand-ins for the providers, used by the store and router tests
#[cfg(test)]
pub mod testing {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    type Reply = Arc<dyn Fn() -> Result<Value, AppError> + Send + Sync>;

    pub struct FakeRecognizer {
        reply: Reply,
        pub calls: AtomicUsize,
    }

    impl FakeRecognizer {
        pub fn new(reply: impl Fn() -> Result<Value, AppError> + Send + Sync + 'static) -> Self {
            Self { reply: Arc::new(reply), calls: AtomicUsize::new(0) }
        }

        pub fn track(track: Value) -> Self {
            Self::new(move || Ok(serde_json::json!({ "track": track.clone() })))
        }
    }

    #[async_trait]
    impl Recognizer for FakeRecognizer {
        async fn recognize(&self, _clip: AudioClip) -> Result<Value, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.reply)()
        }
    }

    #[derive(Default)]
    pub struct FakeCatalog {
        pub tracks: HashMap<String, CatalogTrack>,
        pub artists: HashMap<String, CatalogArtist>,
        pub searches: HashMap<String, Vec<CatalogTrack>>,
        pub failing: HashSet<String>,
        pub down: bool,
        pub isrc_calls: AtomicUsize,
        pub artist_calls: AtomicUsize,
        pub search_calls: AtomicUsize,
    }

    impl FakeCatalog {
        fn outage(&self) -> Result<(), AppError> {
            if self.down {
                return Err(AppError::Unavailable("catalog offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn track_by_isrc(&self, isrc: &str) -> Result<Option<CatalogTrack>, AppError> {
            self.isrc_calls.fetch_add(1, Ordering::SeqCst);
            self.outage()?;
            Ok(self.tracks.get(isrc).cloned())
        }

        async fn artist_by_name(&self, name: &str) -> Result<Option<CatalogArtist>, AppError> {
            self.artist_calls.fetch_add(1, Ordering::SeqCst);
            self.outage()?;
            Ok(self.artists.get(name).cloned())
        }

        async fn search_tracks(&self, query: &str, _limit: u32) ->
            Result<Vec<CatalogTrack>, AppError> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            self.outage()?;
            if self.failing.contains(query) {
                return Err(AppError::Upstream { status: 502, message: "bad gateway".into() });
            }
            Ok(self.searches.get(query).cloned().unwrap_or_default())
        }
    }

    pub struct FakeEvents {
        reply: Reply,
        pub keywords: std::sync::Mutex<Vec<String>>,
    }

    impl FakeEvents {
        pub fn new(reply: impl Fn() -> Result<Value, AppError> + Send + Sync + 'static) -> Self {
            Self { reply: Arc::new(reply), keywords: std::sync::Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl EventSource for FakeEvents {
        async fn events(&self, keyword: &str, _country: Option<&str>, _limit: u32) ->
            Result<Value, AppError> {
            if let Ok(mut seen) = self.keywords.lock() {
                seen.push(keyword.to_string());
            }
            (self.reply)()
        }
    }

    pub fn providers(
        recognizer: FakeRecognizer,
        catalog: FakeCatalog,
        events: FakeEvents
    ) -> Providers {
        Providers::new(Arc::new(recognizer), Arc::new(catalog), Arc::new(events))
    }

    pub fn quiet() -> Providers {
        providers(
            FakeRecognizer::new(|| Ok(serde_json::json!({}))),
            FakeCatalog::default(),
            FakeEvents::new(|| Ok(serde_json::json!({}))),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{http::HeaderMap, routing::{get, post}, Json, Router};
    use serde_json::json;

    use super::*;
    use crate::config::{HttpConfig, SpotifyConfig};

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        addr
    }

    fn spotify_at(addr: SocketAddr, http: &HttpConfig) -> SpotifyClient {
        let cfg = SpotifyConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: url::Url::parse(&format!("http://{addr}/api/token")).unwrap(),
            api_base: url::Url::parse(&format!("http://{addr}/v1/")).unwrap(),
        };
        SpotifyClient::new(http, &cfg).unwrap()
    }

    /// Token route counting hits, search answers only the issued bearer
    fn fake_spotify(token_hits: Arc<AtomicUsize>, expires_in: u64) -> Router {
        Router::new()
            .route("/api/token", post(move || {
                let hits = token_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({ "access_token": "tok", "token_type": "Bearer", "expires_in": expires_in }))
                }
            }))
            .route("/v1/search", get(|headers: HeaderMap| async move {
                let authorized = headers.get("authorization")
                    .and_then(|v| v.to_str().ok()) == Some("Bearer tok");
                if !authorized {
                    return (StatusCode::UNAUTHORIZED, Json(json!({ "error": { "message": "bad token" } })));
                }
                (StatusCode::OK, Json(json!({
                    "tracks": { "items": [{
                        "id": "6GtOsEzNUhJghrIf6UTbRV",
                        "name": "Breathe Deeper",
                        "external_ids": { "isrc": "AUUM71900929" },
                        "artists": [{ "name": "Tame Impala" }]
                    }] }
                })))
            }))
    }

    #[tokio::test]
    async fn token_is_reused_across_lookups() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve(fake_spotify(hits.clone(), 3600)).await;
        let catalog = SpotifyCatalog::new(spotify_at(addr, &HttpConfig::default()));

        let first = catalog.track_by_isrc("AUUM71900929").await.unwrap();
        let second = catalog.track_by_isrc("AUUM71900929").await.unwrap();

        assert_eq!(first.and_then(|t| t.isrc).as_deref(), Some("AUUM71900929"));
        assert!(second.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn token_inside_the_expiry_margin_is_refetched() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve(fake_spotify(hits.clone(), TOKEN_MARGIN_SECS / 2)).await;
        let catalog = SpotifyCatalog::new(spotify_at(addr, &HttpConfig::default()));

        catalog.track_by_isrc("AUUM71900929").await.unwrap();
        catalog.track_by_isrc("AUUM71900929").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_success_keeps_status_and_provider_message() {
        let router = Router::new()
            .route("/api/token", post(|| async {
                Json(json!({ "access_token": "tok", "expires_in": 3600 }))
            }))
            .route("/v1/search", get(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": { "status": 429, "message": "rate limited" } }))
                )
            }));
        let addr = serve(router).await;
        let catalog = SpotifyCatalog::new(spotify_at(addr, &HttpConfig::default()));

        let err = catalog.track_by_isrc("AUUM71900929").await.unwrap_err();
        match err {
            AppError::Upstream { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limited");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_port_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = spotify_at(addr, &HttpConfig::default());
        let err = send_json(client.token_request()).await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn slow_provider_is_a_timeout() {
        let router = Router::new().route("/api/token", post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "access_token": "late" }))
        }));
        let addr = serve(router).await;
        let http = HttpConfig { timeout: Duration::from_millis(200), ..HttpConfig::default() };

        let err = send_json(spotify_at(addr, &http).token_request()).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
    }

    #[test]
    fn upstream_message_prefers_provider_text() {
        let spotify = r#"{"error":{"status":401,"message":"The access token expired"}}"#;
        assert_eq!(
            upstream_message(StatusCode::UNAUTHORIZED, spotify),
            "The access token expired"
        );

        let ticketmaster = r#"{"fault":{"faultstring":"Invalid ApiKey"}}"#;
        assert_eq!(upstream_message(StatusCode::UNAUTHORIZED, ticketmaster), "Invalid ApiKey");

        assert_eq!(upstream_message(StatusCode::TOO_MANY_REQUESTS, "<html>"), "Too Many Requests");
    }

    #[test]
    fn catalog_track_reads_search_item() {
        let item = json!({
            "id": "6GtOsEzNUhJghrIf6UTbRV",
            "name": "Breathe Deeper",
            "uri": "spotify:track:6GtOsEzNUhJghrIf6UTbRV",
            "duration_ms": 372000,
            "popularity": 71,
            "external_ids": { "isrc": "AUUM71900929" },
            "external_urls": { "spotify": "https://open.spotify.com/track/6GtOsEzNUhJghrIf6UTbRV" },
            "artists": [{ "name": "Tame Impala" }],
            "album": {
                "name": "The Slow Rush",
                "release_date": "2020-02-14",
                "images": [{ "url": "https://i.scdn.co/image/large" }]
            }
        });
        let track = CatalogTrack::new(&item);
        assert_eq!(track.isrc.as_deref(), Some("AUUM71900929"));
        assert_eq!(track.album.as_deref(), Some("The Slow Rush"));
        assert_eq!(track.album_image.as_deref(), Some("https://i.scdn.co/image/large"));
        assert_eq!(track.artists, vec!["Tame Impala".to_string()]);
        assert_eq!(track.popularity, Some(71));
    }

    #[test]
    fn enrichment_keeps_failure_visible() {
        let ignored: Enrichment<u8> =
            Enrichment::from_lookup(Err(AppError::Timeout("slow".into())));
        assert!(matches!(ignored, Enrichment::Ignored(AppError::Timeout(_))));
        assert_eq!(ignored.settle("test", "k"), None);

        assert!(matches!(Enrichment::from_lookup(Ok(None::<u8>)), Enrichment::NotFound));
        assert_eq!(Enrichment::from_lookup(Ok(Some(3u8))).settle("test", "k"), Some(3));
    }
}
