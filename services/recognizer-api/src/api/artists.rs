//!
//! src/api/artists.rs
//!

use axum::{
    extract::{Path, Query, State},
    Json
};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::concerts::{self, ConcertList};
use crate::errors::AppError;
use crate::types::Artist;

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<Json<Artist>, AppError> {
    Uuid::parse_str(&id)
        .map_err(|_| AppError::BadRequest("Invalid artist ID format".to_string()))?;
    let artist = state.db.find_artist(&id).await?
        .ok_or_else(|| AppError::NotFound("Artist not found".to_string()))?;
    Ok(Json(artist))
}

#[derive(Debug, Deserialize)]
pub struct ConcertQuery {
    pub country: Option<String>,
    pub limit: Option<u32>,
}

pub async fn concerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ConcertQuery>
) -> Result<Json<ConcertList>, AppError> {
    let list = concerts::lookup(
        &state.db,
        state.providers.events.as_ref(),
        &id,
        query.country.as_deref(),
        query.limit
    ).await?;
    Ok(Json(list))
}
