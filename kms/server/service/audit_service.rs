use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use kms_engine::audit::AuditRecord;
use serde::{Deserialize, Serialize};

use crate::AppState;

const DEFAULT_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AuditResponse {
    pub events: Vec<AuditRecord>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/audit", get(recent_events))
}

/// GET /v1/audit?limit=N, newest first
pub async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<AuditResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Json(AuditResponse {
        events: state.kms.audit.recent(limit),
    })
}
