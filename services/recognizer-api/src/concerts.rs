//!
//! src/concerts.rs
//!
//! Concert lookup for a stored artist. Upstream failures never surface as
//! errors, they become an empty list and an explanation
//!

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::persistent::Persistent;
use crate::providers::EventSource;

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 50;

pub const NONE_UPCOMING: &str = "No upcoming concerts found.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Venue {
    pub name: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    #[serde(rename = "type")]
    pub kind: String,
    pub currency: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Concert {
    pub id: String,
    pub title: String,
    pub datetime: Option<String>,
    pub venue: Venue,
    pub ticket_url: String,
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcertList {
    pub artist_id: String,
    pub artist_name: String,
    pub concerts: Vec<Concert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn text(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer).and_then(|v| v.as_str()).map(str::to_string)
}

fn coordinate(v: &Value, pointer: &str) -> Option<f64> {
    match v.pointer(pointer)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn datetime(event: &Value) -> Option<String> {
    if let Some(exact) = text(event, "/dates/start/dateTime") {
        return Some(exact);
    }
    let date = text(event, "/dates/start/localDate")?;
    match text(event, "/dates/start/localTime") {
        Some(time) => Some(format!("{date}T{time}")),
        None => Some(date),
    }
}

fn venue(event: &Value) -> Venue {
    let Some(v) = event.pointer("/_embedded/venues/0") else {
        return Venue::default();
    };

    let coordinates = match (coordinate(v, "/location/latitude"), coordinate(v, "/location/longitude")) {
        (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
        _ => None,
    };

    Venue {
        name:    text(v, "/name").unwrap_or_default(),
        city:    text(v, "/city/name").unwrap_or_default(),
        region:  text(v, "/state/name").or_else(|| text(v, "/state/stateCode")).unwrap_or_default(),
        country: text(v, "/country/name").or_else(|| text(v, "/country/countryCode")).unwrap_or_default(),
        coordinates,
    }
}

fn offers(event: &Value) -> Vec<Offer> {
    event.get("priceRanges")
        .and_then(|v| v.as_array())
        .map(|ranges| ranges.iter().map(|r| Offer {
            kind:     text(r, "/type").unwrap_or_default(),
            currency: text(r, "/currency").unwrap_or_default(),
            min:      r.get("min").and_then(|v| v.as_f64()),
            max:      r.get("max").and_then(|v| v.as_f64()),
        }).collect())
        .unwrap_or_default()
}

/// Reshapes an events listing into concerts
pub fn reshape(listing: &Value) -> Vec<Concert> {
    listing.pointer("/_embedded/events")
        .and_then(|v| v.as_array())
        .map(|events| events.iter().map(|e| Concert {
            id:         text(e, "/id").unwrap_or_default(),
            title:      text(e, "/name").unwrap_or_default(),
            datetime:   datetime(e),
            venue:      venue(e),
            ticket_url: text(e, "/url").unwrap_or_default(),
            offers:     offers(e),
        }).collect())
        .unwrap_or_default()
}

/// What the caller is told when the events provider fails
pub fn explain(err: &AppError) -> &'static str {
    match err {
        AppError::Timeout(_) => "The concert service timed out. Please try again later.",
        AppError::Upstream { status: 429, .. } =>
            "Concert service rate limit reached. Please try again later.",
        AppError::Upstream { status: 404, .. } => "No concerts found for this artist.",
        AppError::Upstream { status: 401 | 403, .. } =>
            "The concert service rejected our credentials.",
        _ => "Concert information is temporarily unavailable.",
    }
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub async fn lookup(
    db: &Persistent,
    events: &dyn EventSource,
    artist_id: &str,
    country: Option<&str>,
    limit: Option<u32>
) -> Result<ConcertList, AppError> {
    Uuid::parse_str(artist_id)
        .map_err(|_| AppError::BadRequest("Invalid artist ID format".to_string()))?;
    let artist = db.find_artist(artist_id).await?
        .ok_or_else(|| AppError::NotFound("Artist not found".to_string()))?;

    let country = country.map(str::trim).filter(|c| !c.is_empty());
    let limit = clamp_limit(limit);

    let mut list = ConcertList {
        artist_id: artist.id.clone(),
        artist_name: artist.name.clone(),
        concerts: Vec::new(),
        message: None,
    };

    match events.events(&artist.name, country, limit).await {
        Ok(listing) => {
            list.concerts = reshape(&listing);
            if list.concerts.is_empty() {
                list.message = Some(NONE_UPCOMING.to_string());
            }
            info!(artist = %artist.name, count = list.concerts.len(), "concerts.found");
        }
        Err(e) => {
            warn!(artist = %artist.name, error = %e, "concerts.upstream_failed");
            list.message = Some(explain(&e).to_string());
        }
    }
    Ok(list)
}
