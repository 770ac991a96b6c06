use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_store::StoreError;

/// Uniform failure taxonomy for the HTTP and WebSocket surfaces.
///
/// Every variant maps to a `{ "error": message }` JSON body; internal
/// detail stays in the logs.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Handshake or request credential rejected.  One message for every
    /// cause (missing, malformed, expired, unknown user) so nothing leaks
    /// about which check failed.
    #[error("Authentication failed")]
    Authentication,

    /// Malformed input, rejected before any mutation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Referenced chat/user/request absent.
    #[error("{0}")]
    NotFound(String),

    /// Actor lacks permission for the target mutation.
    #[error("{0}")]
    Authorization(String),

    /// Durable write failed after fan-out already occurred.  Logged and
    /// acknowledged to the sender; never retried, never un-delivered.
    #[error("Message could not be saved")]
    Persistence(#[source] StoreError),

    #[error("File too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    #[error("File not found")]
    BlobNotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Authentication => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Authorization(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::BlobTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ApiError::BlobNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("Record not found".to_string()),
            StoreError::Conflict => {
                ApiError::Validation("Conflicting record already exists".to_string())
            }
            other => {
                tracing::error!(error = %other, "store failure");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_404() {
        let err: ApiError = StoreError::NotFound.into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_auth_error_is_uniform() {
        // All auth failures surface the same message.
        assert_eq!(ApiError::Authentication.to_string(), "Authentication failed");
    }
}
