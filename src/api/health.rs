//! Health check endpoint

use axum::{Json, Router, routing::get};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        message: "دستیار رابین آماده است",
    })
}

/// Build health router
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}
