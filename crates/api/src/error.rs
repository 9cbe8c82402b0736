//! API error types and handling

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use eduhub_billing::SubscriptionError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),

    // Validation errors
    #[error("{0}")]
    Validation(String),

    // Resource errors
    #[error("{0}")]
    NotFound(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Build trigger failed: {0}")]
    BuildTrigger(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),

            // Resources
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),

            // Internal
            ApiError::Database(detail) => {
                tracing::error!(error = %detail, "Storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            ApiError::BuildTrigger(detail) => {
                tracing::error!(error = %detail, "Build trigger failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to start mobile app build".to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<SubscriptionError> for ApiError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::NotFound(_) => ApiError::NotFound("Subscription not found".to_string()),
            SubscriptionError::Forbidden => ApiError::Forbidden(
                "Premium subscription required for mobile app access".to_string(),
            ),
            SubscriptionError::InvalidInput(msg) => ApiError::Validation(msg),
            SubscriptionError::Storage(msg) => ApiError::Database(msg),
            SubscriptionError::BuildTrigger(msg) => ApiError::BuildTrigger(msg),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_403_with_message() {
        let (status, body) = body_json(SubscriptionError::Forbidden.into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert_eq!(
            body["message"],
            "Premium subscription required for mobile app access"
        );
    }

    #[tokio::test]
    async fn test_storage_details_are_not_returned() {
        let err: ApiError =
            SubscriptionError::Storage("connection refused to 10.0.0.5".to_string()).into();
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Database error");
    }

    #[tokio::test]
    async fn test_not_found_and_validation_statuses() {
        let (status, _) =
            body_json(SubscriptionError::NotFound("acme".to_string()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            body_json(SubscriptionError::InvalidInput("bad tenant".to_string()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "bad tenant");
    }
}
