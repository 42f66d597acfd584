//! Tool discovery over the hybrid index.

use crate::error::{AppError, Result};
use crate::search::{SearchResult, SearchStats};
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// Natural language or keyword query
    pub q: Option<String>,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
}

/// GET /search?q=&limit=&threshold= - Ranked tools for a query.
///
/// 503 until the search coordinator has initialized; 400 for an empty query,
/// a zero limit, or a threshold outside `[0, 1]`.
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>> {
    if !state.search.is_ready() {
        return Err(AppError::SearchNotReady);
    }

    let query = params.q.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(AppError::ValidationError(
            "Query parameter 'q' cannot be empty".to_string(),
        ));
    }

    if params.limit == Some(0) {
        return Err(AppError::ValidationError(
            "limit must be at least 1".to_string(),
        ));
    }

    if let Some(threshold) = params.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::ValidationError(
                "threshold must be within [0, 1]".to_string(),
            ));
        }
    }

    let results = state
        .search
        .search(query, params.limit, params.threshold)
        .await?;

    tracing::info!(
        query,
        results = results.len(),
        "Search served"
    );

    Ok(Json(results))
}

/// GET /search/stats
pub async fn search_stats_handler(State(state): State<Arc<AppState>>) -> Json<SearchStats> {
    Json(state.search.stats())
}
