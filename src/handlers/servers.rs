use crate::state::AppState;
use crate::upstream::ServerSummary;
use axum::{extract::State, Json};
use std::sync::Arc;

/// GET /servers - Configured backends with title, instructions and state
pub async fn servers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ServerSummary>> {
    Json(state.aggregator.servers())
}
