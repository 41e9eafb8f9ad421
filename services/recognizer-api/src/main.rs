//!
//! src/main.rs
//!
//! Entry point of the recognizer api. Loads configuration, opens the store,
//! builds the provider clients and serves the router. Live provider
//! testbenches sit at the bottom
//!

mod api;
mod concerts;
mod config;
mod errors;
mod fetch;
mod logging;
mod persistent;
mod playlists;
mod providers;
mod recognize;
mod server;
mod types;

use std::sync::Arc;

use crate::errors::AppError;
use crate::providers::{Providers, ShazamRecognizer, SpotifyCatalog, TicketmasterEvents};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cfgs    = config::load_config()?;
    let _logger = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service = "recognizer-api",
        version = %env!("CARGO_PKG_VERSION"),
        env = ?cfgs.server.app_env,
        "starting"
    );

    let db = Arc::new(persistent::Persistent::init(&cfgs.persistence.db_url).await?);

    let shazam       = fetch::ShazamClient::new(&cfgs.http, &cfgs.shazam)?;
    let spotify      = fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let ticketmaster = fetch::TicketmasterClient::new(&cfgs.http, &cfgs.ticketmaster)?;

    let providers = Providers::new(
        Arc::new(ShazamRecognizer::new(shazam)),
        Arc::new(SpotifyCatalog::new(spotify)),
        Arc::new(TicketmasterEvents::new(ticketmaster)),
    );

    let state  = api::AppState::new(db, providers, cfgs.server.app_env);
    let server = server::Server::new(&cfgs.server, state);

    let () = server.run().await?;

    Ok(())
}

/// Live testbenches, each needs LIVE_HTTP=1 and real credentials in .env
#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Catalog, EventSource, Recognizer};

    fn live() -> bool {
        std::env::var("LIVE_HTTP").ok().as_deref() == Some("1")
    }

    #[tokio::test]
    async fn spotify_catalog_testbench() -> Result<(), AppError> {
        dotenvy::dotenv().ok();
        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = config::load_config()?;
        let catalog = SpotifyCatalog::new(fetch::SpotifyClient::new(&cfgs.http, &cfgs.spotify)?);

        // Breathe Deeper - Tame Impala
        let track = catalog.track_by_isrc("AUUM71900929").await?;
        println!("track: {track:#?}");
        assert!(track.is_some());

        let artist = catalog.artist_by_name("Tame Impala").await?;
        println!("artist: {artist:#?}");
        assert!(artist.is_some());

        // second call reuses the cached token
        let tracks = catalog.search_tracks("artist:\"Tame Impala\"", 5).await?;
        assert!(!tracks.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn ticketmaster_events_testbench() -> Result<(), AppError> {
        dotenvy::dotenv().ok();
        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = config::load_config()?;
        let events = TicketmasterEvents::new(
            fetch::TicketmasterClient::new(&cfgs.http, &cfgs.ticketmaster)?
        );

        let listing = events.events("Tame Impala", Some("US"), 5).await?;
        let concerts = concerts::reshape(&listing);
        println!("concerts: {}", serde_json::to_string_pretty(&concerts)?);

        Ok(())
    }

    /// Needs SAMPLE_CLIP pointing at a short audio file
    #[tokio::test]
    async fn shazam_recognizer_testbench() -> Result<(), AppError> {
        dotenvy::dotenv().ok();
        let Ok(path) = std::env::var("SAMPLE_CLIP") else {
            eprintln!("Set LIVE_HTTP=1 and SAMPLE_CLIP to run");
            return Ok(())
        };
        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let cfgs = config::load_config()?;
        let recognizer = ShazamRecognizer::new(fetch::ShazamClient::new(&cfgs.http, &cfgs.shazam)?);

        let clip = fetch::AudioClip {
            bytes: tokio::fs::read(&path).await?,
            file_name: path.clone(),
            content_type: "audio/mpeg".to_string(),
        };
        let response = recognizer.recognize(clip).await?;
        println!("response: {}", serde_json::to_string_pretty(&response)?);

        let track = recognize::matched_track(&response).map(recognize::RecognizedTrack::new);
        println!("recognized: {track:#?}");

        Ok(())
    }

    #[tokio::test]
    async fn file_store_testbench() -> Result<(), AppError> {
        dotenvy::dotenv().ok();
        if !live() {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(())
        }

        let db_url = "sqlite:../data/recognizer-test.db";
        eprintln!("cwd = {}", std::env::current_dir()?.display());
        eprintln!("db  = {db_url}");

        let db = persistent::Persistent::init(db_url).await?;
        let (user, _) = db.ensure_user("testbench-device").await?;
        println!("user: {user:#?}");
        println!("songs: {}", db.count_songs().await?);

        Ok(())
    }
}
