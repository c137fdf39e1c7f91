use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use tessera_core::CoreError;

#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    Internal(anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Core(CoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.message())
            }
            ApiError::Core(CoreError::Unauthorized(_)) => (StatusCode::FORBIDDEN, self.message()),
            ApiError::Core(CoreError::InvalidTransition { .. })
            | ApiError::Core(CoreError::DuplicatePayment(_)) => {
                (StatusCode::CONFLICT, self.message())
            }
            ApiError::Core(CoreError::InsufficientInventory { .. })
            | ApiError::Core(CoreError::EventNotBookable(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.message())
            }
            ApiError::Core(CoreError::GatewayFailure(_)) => {
                (StatusCode::BAD_GATEWAY, self.message())
            }
            ApiError::Core(CoreError::Storage(msg)) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl ApiError {
    fn message(&self) -> String {
        match self {
            ApiError::Core(err) => err.to_string(),
            ApiError::Internal(err) => err.to_string(),
        }
    }
}
