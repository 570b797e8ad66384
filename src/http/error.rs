//! Error payloads.

use crate::Error;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// A request-level failure rendered as `{"error": {"kind", "message"}}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::NoActiveVersion => StatusCode::SERVICE_UNAVAILABLE,
            Error::VersionNotFound { .. } => StatusCode::NOT_FOUND,
            Error::RetrainInProgress => StatusCode::CONFLICT,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Cancelled => StatusCode::GONE,
            Error::TrainerFailure(_)
            | Error::ChannelDelivery { .. }
            | Error::StorageFailure { .. }
            | Error::OperationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }
        let body = serde_json::json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Handler result type.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Error::Unauthorized("missing token".into()), StatusCode::UNAUTHORIZED; "auth")]
    #[test_case(Error::NoActiveVersion, StatusCode::SERVICE_UNAVAILABLE; "no active")]
    #[test_case(Error::VersionNotFound { version: 9 }, StatusCode::NOT_FOUND; "not found")]
    #[test_case(Error::RetrainInProgress, StatusCode::CONFLICT; "busy")]
    #[test_case(Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST; "invalid")]
    #[test_case(Error::storage("append", "disk"), StatusCode::INTERNAL_SERVER_ERROR; "storage")]
    fn test_status_mapping(err: Error, expected: StatusCode) {
        assert_eq!(ApiError(err).status(), expected);
    }
}
