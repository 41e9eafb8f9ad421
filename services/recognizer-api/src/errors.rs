//!
//! src/errors.rs
//!
//! Defines the error enum used across the api, conversions from the
//! libraries we call into, and translation into http responses
//!

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("{0}")]
    MissingInput(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("network unavailable: {0}")]
    Unavailable(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

/// Marks a response produced by an unclassified fault so the masking
/// middleware can hide its message in production
#[derive(Debug, Clone, Copy)]
pub struct InternalFault;

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MissingInput(_) => "missing-input",
            AppError::BadRequest(_)   => "bad-request",
            AppError::Forbidden(_)    => "forbidden",
            AppError::NotFound(_)     => "not-found",
            AppError::PayloadTooLarge(_) => "payload-too-large",
            AppError::Timeout(_)      => "timeout",
            AppError::Upstream { .. } => "upstream-error",
            AppError::Unavailable(_)  => "unavailable",
            AppError::Config(_)
            | AppError::Http(_)
            | AppError::Parse(_)
            | AppError::Db(_)
            | AppError::Io(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingInput(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_)   => StatusCode::FORBIDDEN,
            AppError::NotFound(_)    => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Timeout(_)     => StatusCode::REQUEST_TIMEOUT,
            AppError::Upstream { status, .. } => upstream_status(*status),
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message handed back to the caller, upstream errors keep only the
    /// provider's own text
    pub fn public_message(&self) -> String {
        match self {
            AppError::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == "internal"
    }
}

/// Providers sometimes answer with a non-error status on failure paths,
/// those surface as 503
fn upstream_status(status: u16) -> StatusCode {
    match StatusCode::from_u16(status) {
        Ok(code) if code.is_client_error() || code.is_server_error() => code,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request.failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "request.rejected");
        }

        let body = Json(json!({
            "error": self.kind(),
            "message": self.public_message(),
        }));
        let mut response = (status, body).into_response();
        if self.is_internal() {
            response.extensions_mut().insert(InternalFault);
        }
        response
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else if e.is_connect() {
            AppError::Unavailable(e.to_string())
        } else if let Some(status) = e.status() {
            AppError::Upstream { status: status.as_u16(), message: e.to_string() }
        } else {
            AppError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self { AppError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self { AppError::Db(e.to_string()) }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(format!("upload too large: {}", e.body_text()))
        } else {
            AppError::BadRequest(format!("malformed upload: {}", e.body_text()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_statuses() {
        assert_eq!(AppError::MissingInput("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Timeout("x".into()).status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            AppError::PayloadTooLarge("x".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(AppError::Db("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AppError::Unavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn upstream_status_is_mirrored_or_defaults_to_503() {
        let mirrored = AppError::Upstream { status: 429, message: "slow down".into() };
        assert_eq!(mirrored.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(mirrored.public_message(), "slow down");

        let odd = AppError::Upstream { status: 200, message: "?".into() };
        assert_eq!(odd.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn only_unclassified_faults_are_marked_internal() {
        let response = AppError::Db("disk full".into()).into_response();
        assert!(response.extensions().get::<InternalFault>().is_some());

        let response = AppError::NotFound("gone".into()).into_response();
        assert!(response.extensions().get::<InternalFault>().is_none());
    }
}
