//! Error types for LanShare
//!
//! `ShareError` is the request-level taxonomy every component error folds
//! into before it reaches the network. Each variant maps to exactly one
//! HTTP status class.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::auth::AuthError;
use crate::catalog::CatalogError;
use crate::thumbnail::ThumbnailError;
use crate::upload::{SinkError, UploadError};

/// Result type alias for request handling
pub type Result<T> = std::result::Result<T, ShareError>;

/// Main error type for request handling
#[derive(Error, Debug)]
pub enum ShareError {
    #[error("PIN required or invalid")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Saving the upload failed")]
    StorageSink(#[source] SinkError),

    /// Carries the real cause for logging; the response body stays generic.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShareError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ShareError::Unauthorized => StatusCode::UNAUTHORIZED,
            ShareError::Validation(_) => StatusCode::BAD_REQUEST,
            ShareError::NotFound(_) => StatusCode::NOT_FOUND,
            ShareError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ShareError::StorageSink(_) | ShareError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Plain-text body sent to the client
    pub fn public_message(&self) -> String {
        match self {
            ShareError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Check if this error is caused by the client
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ShareError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ShareError::NotFound(msg.into())
    }
}

impl IntoResponse for ShareError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, source = ?std::error::Error::source(&self), "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.public_message(),
        )
            .into_response()
    }
}

impl From<AuthError> for ShareError {
    fn from(_: AuthError) -> Self {
        ShareError::Unauthorized
    }
}

impl From<CatalogError> for ShareError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::EntryNotFound { .. } => ShareError::NotFound("Item not found".into()),
            CatalogError::Io(e) => ShareError::Internal(e.to_string()),
            CatalogError::InvalidRoot { path } => {
                ShareError::Internal(format!("invalid catalog root {}", path.display()))
            }
        }
    }
}

impl From<ThumbnailError> for ShareError {
    fn from(err: ThumbnailError) -> Self {
        if err.is_not_found() {
            ShareError::NotFound("Thumbnail not available".into())
        } else {
            ShareError::Internal(err.to_string())
        }
    }
}

impl From<UploadError> for ShareError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::SessionNotFound { .. } => ShareError::NotFound("Upload not found".into()),
            UploadError::TotalMismatch { .. }
            | UploadError::OffsetOutOfRange { .. }
            | UploadError::ChunkOverflow { .. }
            | UploadError::ChunkTooLarge { .. }
            | UploadError::IncompleteUpload { .. } => ShareError::Validation(err.to_string()),
            UploadError::BodyRead { .. } => ShareError::Validation(err.to_string()),
            UploadError::Sink(e) => ShareError::StorageSink(e),
            UploadError::Io(e) => ShareError::Internal(e.to_string()),
        }
    }
}

impl From<ArchiveError> for ShareError {
    fn from(err: ArchiveError) -> Self {
        ShareError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ShareError {
    fn from(err: tokio::task::JoinError) -> Self {
        ShareError::Internal(format!("worker task failed: {}", err))
    }
}
