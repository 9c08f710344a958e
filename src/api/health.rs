//! Liveness and readiness probe handlers.

use crate::api::AppState;
use crate::metrics::ImportPhase;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Probe response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    /// Import requests per phase
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub imports: BTreeMap<ImportPhase, usize>,
}

/// GET /healthz - The process is up.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.metrics_collector.uptime_seconds(),
        imports: state.metrics_collector.import_counts().into_iter().collect(),
    })
}

/// GET /readyz - 200 once the controller is processing, 503 before.
pub async fn readyz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    };
    (
        code,
        Json(HealthResponse {
            status,
            uptime_seconds: state.metrics_collector.uptime_seconds(),
            imports: BTreeMap::new(),
        }),
    )
}
