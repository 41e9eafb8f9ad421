//!
//! src/api/device.rs
//!
//! Device identity taken from the `x-device-id` header. The value is trusted
//! as presented: there is no token or signature behind it
//!

use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts
};

use crate::errors::AppError;

pub const DEVICE_HEADER: &str = "x-device-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn read_header(parts: &Parts) -> Option<String> {
    parts.headers
        .get(DEVICE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S: Send + Sync> FromRequestParts<S> for DeviceId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        read_header(parts)
            .map(DeviceId)
            .ok_or_else(|| AppError::MissingInput(format!("{DEVICE_HEADER} header is required")))
    }
}

/// Lets handlers take `Option<DeviceId>` where the identity is optional
impl<S: Send + Sync> OptionalFromRequestParts<S> for DeviceId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) ->
        Result<Option<Self>, Self::Rejection> {
        Ok(read_header(parts).map(DeviceId))
    }
}
