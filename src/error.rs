//! Error types for the conversion gateway
//!
//! Bodies are plain text. Client mistakes and content problems are `400`;
//! everything else is `503 FAIL`, and [`AppError::quarantines`] tells the
//! handler which errors must take the service out of rotation.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::formats::UnsupportedFormat;
use crate::scratch::ScratchError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormat),

    #[error("No file uploaded")]
    NoFileUploaded,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upload exceeds the size limit")]
    PayloadTooLarge,

    /// The converter could not read the uploaded content
    #[error("{0}")]
    ContentRejected(String),

    /// Quarantined; no conversion was attempted
    #[error("Service is quarantined")]
    Unavailable,

    #[error("Conversion failed: {0}")]
    Engine(String),

    #[error("Scratch file error: {0}")]
    Scratch(#[from] ScratchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that leave the converter untrusted
    pub fn quarantines(&self) -> bool {
        matches!(
            self,
            AppError::Engine(_) | AppError::Scratch(_) | AppError::Io(_) | AppError::Internal(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::UnsupportedFormat(_)
            | AppError::NoFileUploaded
            | AppError::BadRequest(_)
            | AppError::ContentRejected(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Unavailable
            | AppError::Engine(_)
            | AppError::Scratch(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::Unavailable => "BUSY".to_string(),
            e if e.quarantines() => {
                tracing::error!("Error: {}", e);
                "FAIL".to_string()
            }
            e => {
                tracing::info!(status = status.as_u16(), "Rejected request: {}", e);
                e.to_string()
            }
        };

        (status, body).into_response()
    }
}
