use crate::{
    services::media_service::MediaError,
    store::{StoreError, signing::SignatureError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error returned by every handler, rendered as `{"error", "status"}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Generic 500; the caller logs the detail.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
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

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::MissingFile
            | MediaError::UnsupportedMediaType(_)
            | MediaError::InvalidQuery(_) => AppError::bad_request(err.to_string()),
            MediaError::PayloadTooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            MediaError::NotFound => AppError::not_found(err.to_string()),
            MediaError::Store(store) => store.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ObjectNotFound { .. } => AppError::not_found("Object not found"),
            StoreError::InvalidObjectKey => AppError::bad_request("Invalid object key"),
            other => {
                tracing::error!(error = %other, "store operation failed");
                AppError::internal("Internal storage error")
            }
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        AppError::new(StatusCode::FORBIDDEN, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_errors_map_onto_status_codes() {
        let cases = [
            (MediaError::MissingFile, StatusCode::BAD_REQUEST),
            (
                MediaError::UnsupportedMediaType("application/pdf".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                MediaError::PayloadTooLarge { limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (MediaError::NotFound, StatusCode::NOT_FOUND),
            (
                MediaError::Store(StoreError::S3("connection reset".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn store_failures_hide_detail() {
        let err = AppError::from(MediaError::Store(StoreError::S3("secret detail".into())));
        assert!(!err.message.contains("secret detail"));
    }
}
