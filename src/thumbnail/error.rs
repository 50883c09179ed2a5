//! Thumbnail error types

use thiserror::Error;

/// Thumbnail error type
#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("No entry with id {id}")]
    EntryNotFound { id: usize },

    #[error("Failed to decode media: {reason}")]
    Decode { reason: String },

    #[error("Failed to encode thumbnail: {reason}")]
    Encode { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThumbnailError {
    /// Whether the caller should see "no thumbnail" rather than a server fault.
    /// Unreadable or undecodable media is not an error of the server.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ThumbnailError::EntryNotFound { .. } | ThumbnailError::Decode { .. } | ThumbnailError::Io(_)
        )
    }

    pub(crate) fn decode(reason: impl std::fmt::Display) -> Self {
        ThumbnailError::Decode {
            reason: reason.to_string(),
        }
    }
}
