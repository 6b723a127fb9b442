//! HTTP mapping of the engine error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::errors::PoiesisError;

/// Wrapper giving [`PoiesisError`] an HTTP shape: a status code plus a
/// `{error, message}` body. Driver-level details never leak to clients.
#[derive(Debug)]
pub struct ApiError(pub PoiesisError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<PoiesisError> for ApiError {
    fn from(err: PoiesisError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PoiesisError::Validation(_) => StatusCode::BAD_REQUEST,
            PoiesisError::Auth(_) => StatusCode::UNAUTHORIZED,
            PoiesisError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            PoiesisError::Validation(_) => "ValidationError",
            PoiesisError::Auth(_) => "AuthError",
            PoiesisError::NotFound(_) => "NotFound",
            _ => "InternalServerError",
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            PoiesisError::Validation(_) | PoiesisError::Auth(_) | PoiesisError::NotFound(_) => {
                self.0.to_string()
            }
            // Driver and engine internals stay server-side.
            _ => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request failed");
        }
        let body = Json(json!({
            "error": self.code(),
            "message": self.message(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_status_codes() {
        let cases = [
            (PoiesisError::Validation("v".into()), StatusCode::BAD_REQUEST),
            (PoiesisError::Auth("a".into()), StatusCode::UNAUTHORIZED),
            (PoiesisError::NotFound("n".into()), StatusCode::NOT_FOUND),
            (
                PoiesisError::StorageUnavailable("s".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PoiesisError::Conflict("c".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn internal_messages_do_not_leak() {
        let err = ApiError(PoiesisError::StorageUnavailable("mongodb://secret".into()));
        assert_eq!(err.message(), "internal server error");
        let err = ApiError(PoiesisError::Validation("bad input".into()));
        assert!(err.message().contains("bad input"));
    }
}
