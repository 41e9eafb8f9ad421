//!
//! src/api/middleware.rs
//!
//! Request logging and the production mask over internal error messages
//!

use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Json, Response}
};
use serde_json::json;
use tracing::info;

use crate::config::AppEnv;
use crate::errors::InternalFault;

pub const MASKED_MESSAGE: &str = "Internal server error";

/// In production an internal fault keeps its status but loses its message
pub async fn mask_internal_errors(
    State(env): State<AppEnv>,
    request: Request,
    next: Next
) -> Response {
    let response = next.run(request).await;
    if env != AppEnv::Prod || response.extensions().get::<InternalFault>().is_none() {
        return response;
    }

    let status = response.status();
    (status, Json(json!({ "error": "internal", "message": MASKED_MESSAGE }))).into_response()
}

pub async fn log_requests(request: Request, next: Next) -> Response {
    let method  = request.method().clone();
    let path    = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
