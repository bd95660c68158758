use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use courier_types::ChatError;

/// Newtype so the shared `ChatError` taxonomy can map onto HTTP responses.
/// Request/response endpoints return `{ "error": "..." }` with the matching
/// status; internal store failures are logged and masked.
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(ChatError::Internal(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ChatError::Unauthorized => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            ChatError::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            ChatError::Forbidden(_) => (StatusCode::FORBIDDEN, self.0.to_string()),
            ChatError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            ChatError::Conflict(_) => (StatusCode::CONFLICT, self.0.to_string()),
            ChatError::Internal(e) => {
                error!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
