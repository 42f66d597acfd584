use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum AppError {
    #[error("Connection to '{server}' timed out after {timeout_secs}s")]
    ConnectTimeout { server: String, timeout_secs: u64 },

    #[error("Connection to '{server}' refused: {reason}")]
    ConnectRefused { server: String, reason: String },

    #[error("Server '{0}' requires authorization")]
    Unauthorized(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Tool call failed: {0}")]
    ToolCallError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Server not connected: {0}")]
    ServerNotConnected(String),

    #[error("Embedding backend not initialized")]
    NotInitialized,

    #[error("Search index is still initializing")]
    SearchNotReady,

    #[error("Model inference failed: {0}")]
    ModelError(String),

    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Service temporarily unavailable: {0}")]
    ResourceError(String),

    #[error("Tokenization failed: {0}")]
    TokenizationError(String),

    #[error("Embedding cache error: {0}")]
    CacheError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::ToolNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServerNotConnected(_)
            | AppError::SearchNotReady
            | AppError::NotInitialized
            | AppError::ResourceError(_)
            | AppError::ConnectTimeout { .. }
            | AppError::ConnectRefused { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ProtocolError(_)
            | AppError::ToolCallError(_)
            | AppError::ModelError(_)
            | AppError::TokenizationError(_)
            | AppError::CacheError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<ort::Error> for AppError {
    fn from(err: ort::Error) -> Self {
        AppError::ModelError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_maps_to_401() {
        let err = AppError::Unauthorized("github".into());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_not_connected_and_not_ready_map_to_503() {
        assert_eq!(
            AppError::ServerNotConnected("jira".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::SearchNotReady.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_tool_call_failure_maps_to_500() {
        let err = AppError::ToolCallError("boom".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
