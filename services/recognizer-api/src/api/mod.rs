//!
//! src/api/mod.rs
//!
//! HTTP surface. Routes, shared state and the layers every request passes
//! through
//!

mod artists;
mod device;
mod health;
mod middleware;
mod playlists;
mod songs;
mod users;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit},
    routing::{delete, get, post},
    Json, Router
};

pub use device::DeviceId;

use crate::config::AppEnv;
use crate::errors::AppError;
use crate::persistent::Persistent;
use crate::providers::Providers;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Persistent>,
    pub providers: Providers,
    pub env: AppEnv,
}

impl AppState {
    pub fn new(db: Arc<Persistent>, providers: Providers, env: AppEnv) -> Self {
        Self { db, providers, env }
    }
}

/// Unwraps a json body, a malformed or absent body is a client error
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let env = state.env;

    Router::new()
        .route("/health", get(health::health))
        .route("/users", post(users::create))
        .route(
            "/users/search-history",
            post(users::add_history).get(users::history).delete(users::clear_history)
        )
        .route("/users/search-history/{song_id}", delete(users::remove_history))
        .route("/users/artists-from-history", get(users::artists_from_history))
        .route("/songs", post(songs::submit))
        .route("/songs/recognize", post(songs::recognize))
        .route("/songs/top/popular", get(songs::top_popular))
        .route("/songs/{id}", get(songs::get))
        .route("/artists/{id}", get(artists::get))
        .route("/artists/{id}/concerts", get(artists::concerts))
        .route("/playlists", post(playlists::create))
        .route("/playlists/create", post(playlists::create))
        .route("/playlists/all", get(playlists::all))
        .route("/playlists/for-you", get(playlists::for_you))
        .route("/playlists/{id}", get(playlists::get).delete(playlists::delete))
        .route("/playlists/{id}/share", post(playlists::share))
        .route("/playlists/{id}/leave", post(playlists::leave))
        .route(
            "/playlists/{id}/songs/{song_id}",
            post(playlists::add_song).delete(playlists::remove_song)
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(axum::middleware::from_fn_with_state(env, middleware::mask_internal_errors))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}
