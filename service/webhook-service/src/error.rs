//! Maps the core error taxonomy onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use webhook_common::error::{ApiError, SecurityError, StoreError};

pub struct HttpError(ApiError);

impl From<ApiError> for HttpError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ApiError::Security(SecurityError::MissingSignature) => {
                (StatusCode::UNAUTHORIZED, "missing X-Signature header".to_string())
            }
            ApiError::Security(SecurityError::InvalidSignature) => {
                (StatusCode::UNAUTHORIZED, "invalid signature".to_string())
            }
            ApiError::MalformedJson(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Store(StoreError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("event {id} not found"))
            }
            ApiError::Store(StoreError::InvalidId(id)) => {
                (StatusCode::BAD_REQUEST, format!("invalid event id: {id}"))
            }
            ApiError::Store(StoreError::DuplicateIdempotencyKey) => {
                (StatusCode::OK, "duplicate".to_string())
            }
            ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::Delivery(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
