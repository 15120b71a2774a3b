use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use fast_track_core::api::ErrorBody;
use tracing::error;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Every failure answers `{"error": "<message>"}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(&'static str),
    Internal(&'static str),
}

impl ApiError {
    /// Logs the cause and hides it from the client.
    pub fn internal(message: &'static str, cause: impl std::fmt::Display) -> Self {
        error!(error = %cause, "{message}");
        ApiError::Internal(message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message.to_string()),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
