use crate::services::errors::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::InvalidArgument(_) | UploadError::ChunkIndexOutOfRange { .. } => {
                StatusCode::BAD_REQUEST
            }
            UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::InvalidState { .. } | UploadError::ConcurrencyConflict(_) => {
                StatusCode::CONFLICT
            }
            UploadError::Expired { .. } => StatusCode::GONE,
            UploadError::QuotaExceeded(_) => StatusCode::FORBIDDEN,
            UploadError::SizeMismatch { .. } | UploadError::UnreadableMedia(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            UploadError::Storage(_) | UploadError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn maps_upload_errors_to_statuses() {
        let cases = [
            (
                UploadError::ChunkIndexOutOfRange { index: 3, total: 3 },
                StatusCode::BAD_REQUEST,
            ),
            (UploadError::NotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                UploadError::Expired {
                    id: Uuid::nil(),
                    expires_at: chrono::Utc::now(),
                },
                StatusCode::GONE,
            ),
            (
                UploadError::QuotaExceeded("too long".into()),
                StatusCode::FORBIDDEN,
            ),
            (
                UploadError::SizeMismatch {
                    declared: 1000,
                    actual: 1101,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
