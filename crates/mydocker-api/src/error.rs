//! HTTP projection of runtime errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mydocker_error::Error;

/// Result type alias for API handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

/// A runtime error carried to the HTTP layer.
///
/// Every error becomes a 4xx/5xx response with a JSON `{message}` body:
/// validation → 400, not-found → 404, illegal state → 409, everything
/// else (kernel, spawn, I/O, timeout, internal) → 500.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    /// HTTP status code for the wrapped error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error message for the response body.
    #[must_use]
    pub fn message(&self) -> String {
        self.0.to_string()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "message": self.message() });
        (status, axum::Json(body)).into_response()
    }
}
