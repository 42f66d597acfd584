pub mod health;
pub mod search;
pub mod servers;
pub mod tools;

pub use health::{health_handler, ready_handler};
pub use search::{search_handler, search_stats_handler};
pub use servers::servers_handler;
pub use tools::{call_tool_handler, list_tools_handler, runtime_bindings_handler};

use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Tool call bodies are argument objects; keep them bounded.
const MAX_CALL_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Every route of the gateway except `/metrics`, which needs the recorder
/// handle owned by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/servers", get(servers_handler))
        .route("/tools", get(list_tools_handler))
        .route(
            "/tools/:qualified_id",
            post(call_tool_handler).layer(DefaultBodyLimit::max(MAX_CALL_BODY_BYTES)),
        )
        .route("/search", get(search_handler))
        .route("/search/stats", get(search_stats_handler))
        .route("/runtime/tools.ts", get(runtime_bindings_handler))
        .with_state(state)
}
