//! Upload error types

use thiserror::Error;

/// Failure to place a finished upload in permanent storage
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Storage rejected the upload: {reason}")]
    Rejected { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upload protocol error type
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload not found: {id}")]
    SessionNotFound { id: String },

    #[error("Declared total {declared} does not match session total {expected}")]
    TotalMismatch { expected: u64, declared: u64 },

    #[error("Offset {offset} is beyond the declared total {total}")]
    OffsetOutOfRange { offset: u64, total: u64 },

    #[error("Chunk at offset {offset} runs past the declared total {total}")]
    ChunkOverflow { offset: u64, total: u64 },

    #[error("Chunk is larger than {max} bytes")]
    ChunkTooLarge { max: u64 },

    #[error("Incomplete upload: received {received} of {total} bytes")]
    IncompleteUpload { received: u64, total: u64 },

    #[error("Failed to read request body: {reason}")]
    BodyRead { reason: String },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, UploadError::SessionNotFound { .. })
    }
}
