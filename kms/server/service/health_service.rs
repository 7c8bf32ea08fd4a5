// Liveness only: no auth, no engine access.

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub time: String,
    pub hostname: String,
    pub version: &'static str,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(check))
        .route("/v1/health", get(check))
}

/// GET /health
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        time: chrono::Utc::now().to_rfc3339(),
        hostname: hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string()),
        version: env!("CARGO_PKG_VERSION"),
    })
}
