use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct SearchHealth {
    pub ready: bool,
    pub semantic: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub search: SearchHealth,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub tools: usize,
}

/// GET /health - Liveness probe with search status
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        search: SearchHealth {
            ready: state.search.is_ready(),
            semantic: state.search.is_semantic_available(),
        },
    })
}

/// GET /ready - Readiness probe (search coordinator initialized)
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let tools = state.aggregator.catalog().len();
    if state.is_ready() {
        (StatusCode::OK, Json(ReadyResponse { status: "ready", tools }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not_ready",
                tools,
            }),
        )
    }
}
