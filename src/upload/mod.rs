//! Resumable chunked uploads
//!
//! Three phases per file: `init` declares name, mime and size and returns a
//! session id; `chunk` writes a byte range at an explicit offset (retries
//! and duplicates are harmless); `finish` hands the assembled file to a
//! [`StorageSink`] and retires the session.

mod error;
mod manager;
mod session;
mod sink;

pub use error::{SinkError, UploadError};
pub use manager::{StoredUpload, UploadSessionManager, MAX_CHUNK_BYTES};
pub use session::{SessionState, UploadSession, UploadStatus};
pub use sink::{DirectorySink, StorageSink};
