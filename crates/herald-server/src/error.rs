//! API error responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use herald_notifications::NotificationError;
use serde_json::json;

/// Error returned by every handler, rendered as
/// `{"success": false, "error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Notification(#[from] NotificationError),

    /// Malformed or incomplete request body
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Notification(e) => match e {
                NotificationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                NotificationError::RecipientNotFound(_) => StatusCode::NOT_FOUND,
                NotificationError::DirectoryUnavailable(_)
                | NotificationError::ChannelSendFailure(_)
                | NotificationError::InvalidConfig(_)
                | NotificationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid-request",
            Self::Notification(NotificationError::InvalidConfig(_)) => "internal",
            Self::Notification(e) => e.code(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(NotificationError::InvalidRequest("x".into())),
                StatusCode::BAD_REQUEST,
                "invalid-request",
            ),
            (
                ApiError::from(NotificationError::RecipientNotFound("x".into())),
                StatusCode::NOT_FOUND,
                "not-found",
            ),
            (
                ApiError::from(NotificationError::DirectoryUnavailable("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "directory-unavailable",
            ),
            (
                ApiError::from(NotificationError::ChannelSendFailure("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "channel-send-failure",
            ),
            (
                ApiError::from(NotificationError::InvalidConfig("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
            (
                ApiError::BadRequest("missing body".into()),
                StatusCode::BAD_REQUEST,
                "invalid-request",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status(), status, "{err}");
            assert_eq!(err.code(), code, "{err}");
        }
    }
}
