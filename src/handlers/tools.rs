use crate::error::{AppError, Result};
use crate::ingestion::ToolDescriptor;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct ToolFilter {
    /// Comma-separated server names and/or qualified tool ids
    pub filter: Option<String>,
}

impl ToolFilter {
    fn select(&self, state: &AppState) -> Vec<ToolDescriptor> {
        match self.filter.as_deref().map(str::trim) {
            Some(expr) if !expr.is_empty() => state.aggregator.get_tools_by_filter(expr),
            _ => state.aggregator.get_all_tools(),
        }
    }
}

/// GET /tools[?filter=]
pub async fn list_tools_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ToolFilter>,
) -> Json<Vec<ToolDescriptor>> {
    Json(filter.select(&state))
}

/// POST /tools/{qualified_id} - Forward a call to the owning backend.
///
/// The body is the tool's argument object. An empty body means no arguments.
pub async fn call_tool_handler(
    State(state): State<Arc<AppState>>,
    Path(qualified_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>> {
    let arguments = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::ValidationError(format!("Invalid JSON body: {}", e)))?
    };

    let result = state.aggregator.call_tool(&qualified_id, arguments).await?;
    Ok(Json(result))
}

/// GET /runtime/tools.ts[?filter=] - Client bindings for the selected tools
pub async fn runtime_bindings_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ToolFilter>,
) -> impl IntoResponse {
    let tools = filter.select(&state);
    let body = state.renderer.render(&tools);
    ([(header::CONTENT_TYPE, state.renderer.content_type())], body)
}
