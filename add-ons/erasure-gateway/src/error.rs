//! Maps `ErasureError` (§7 taxonomy) onto the HTTP boundary: every response
//! body carries `{error, code, status, metadata}` so a client can match on
//! `code` rather than parsing prose.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use erasure_core::errors::ErasureError;
use serde_json::json;

pub struct ApiError(pub ErasureError);

impl From<ErasureError> for ApiError {
    fn from(err: ErasureError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.0.message,
            "code": self.0.code(),
            "status": self.0.status,
            "timestamp": self.0.timestamp,
            "metadata": self.0.metadata,
        }));
        (status, body).into_response()
    }
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(ErasureError::validation(message))
}
