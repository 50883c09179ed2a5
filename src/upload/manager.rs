//! Session table and the three protocol phases

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use super::session::{SessionState, UploadSession, UploadStatus};
use super::sink::{DirectorySink, StorageSink};
use super::UploadError;
use crate::core::utils::sanitize_filename;
use crate::core::{FinalizePolicy, UploadSection};

/// Largest chunk body accepted in one request
pub const MAX_CHUNK_BYTES: u64 = 64 * 1024 * 1024;

/// Result of a successful `finish`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    /// Sanitized name handed to the sink
    pub name: String,
    /// Where the sink placed the file
    pub path: PathBuf,
    pub bytes: u64,
}

/// Owns every in-progress upload
pub struct UploadSessionManager {
    pub(super) sessions: DashMap<String, Arc<UploadSession>>,
    scratch_dir: PathBuf,
    sink: Arc<dyn StorageSink>,
    policy: FinalizePolicy,
    idle_timeout: Duration,
}

impl std::fmt::Debug for UploadSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSessionManager")
            .field("sessions", &self.sessions.len())
            .field("scratch_dir", &self.scratch_dir)
            .field("policy", &self.policy)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl UploadSessionManager {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        sink: Arc<dyn StorageSink>,
        policy: FinalizePolicy,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            scratch_dir: scratch_dir.into(),
            sink,
            policy,
            idle_timeout,
        }
    }

    /// Manager that stores finished uploads in `destination_dir`
    pub fn from_config(config: &UploadSection) -> Self {
        Self::new(
            config.scratch_dir(),
            Arc::new(DirectorySink::new(config.destination_dir.clone())),
            config.finalize_policy,
            config.idle_timeout(),
        )
    }

    pub fn policy(&self) -> FinalizePolicy {
        self.policy
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn status(&self, id: &str) -> Option<UploadStatus> {
        self.sessions.get(id).map(|s| s.status())
    }

    /// Start an upload: allocate scratch storage and return the session id
    pub fn init(&self, name: &str, mime: &str, total_size: u64) -> Result<String, UploadError> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix("up_")
            .suffix(".part")
            .tempfile_in(&self.scratch_dir)?
            .into_temp_path();

        let id = Uuid::new_v4().to_string();
        let session = UploadSession::new(
            id.clone(),
            name.to_string(),
            mime.to_string(),
            total_size,
            scratch,
        );
        self.sessions.insert(id.clone(), Arc::new(session));

        tracing::info!(session_id = %id, name, mime, total_size, "Upload started");
        Ok(id)
    }

    /// Clone the session out of the table so no map guard is held across awaits
    fn lookup(&self, id: &str) -> Result<Arc<UploadSession>, UploadError> {
        self.sessions
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| UploadError::SessionNotFound { id: id.to_string() })
    }

    /// Write one chunk at `offset`. Returns the new high-water mark.
    ///
    /// All header checks happen before the scratch file is touched. The body
    /// is written only after it has been read to the end without error and
    /// within the declared total.
    pub async fn chunk<S, E>(
        &self,
        id: &str,
        offset: u64,
        declared_total: u64,
        content_length: Option<u64>,
        body: S,
    ) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let session = self.lookup(id)?;
        let total = session.declared_total_size();

        if declared_total != total {
            return Err(UploadError::TotalMismatch {
                expected: total,
                declared: declared_total,
            });
        }
        if offset > total {
            return Err(UploadError::OffsetOutOfRange { offset, total });
        }
        if let Some(len) = content_length {
            if offset.checked_add(len).map_or(true, |end| end > total) {
                return Err(UploadError::ChunkOverflow { offset, total });
            }
            if len > MAX_CHUNK_BYTES {
                return Err(UploadError::ChunkTooLarge { max: MAX_CHUNK_BYTES });
            }
        }

        let _writer = session
            .begin_write()
            .ok_or_else(|| UploadError::SessionNotFound { id: id.to_string() })?;

        // The whole chunk is buffered so a rejected body never reaches storage.
        let capacity = total - offset;
        let mut buffer = BytesMut::with_capacity(content_length.unwrap_or(0) as usize);
        let mut body = std::pin::pin!(body);
        while let Some(piece) = body.next().await {
            let piece = piece.map_err(|e| UploadError::BodyRead {
                reason: e.to_string(),
            })?;
            if buffer.len() as u64 + piece.len() as u64 > capacity {
                tracing::warn!(session_id = %id, offset, total, "Chunk overflows declared total");
                return Err(UploadError::ChunkOverflow { offset, total });
            }
            if buffer.len() as u64 + piece.len() as u64 > MAX_CHUNK_BYTES {
                return Err(UploadError::ChunkTooLarge { max: MAX_CHUNK_BYTES });
            }
            buffer.extend_from_slice(&piece);
        }
        let written = buffer.len() as u64;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(session.scratch_path())
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&buffer).await?;
        file.flush().await?;

        let high_water_mark = session.record_write(offset + written);
        tracing::debug!(
            session_id = %id,
            offset,
            bytes = written,
            high_water_mark,
            "Chunk written"
        );
        Ok(high_water_mark)
    }

    /// Complete an upload. The session is consumed whether or not this
    /// succeeds, and its scratch file is always deleted.
    pub async fn finish(&self, id: &str) -> Result<StoredUpload, UploadError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| UploadError::SessionNotFound { id: id.to_string() })?;

        let received = session.high_water_mark();
        let total = session.declared_total_size();
        let name = sanitize_filename(session.declared_name());

        let outcome = if self.policy == FinalizePolicy::RequireComplete && received != total {
            Err(UploadError::IncompleteUpload { received, total })
        } else {
            self.sink
                .store(session.scratch_path(), &name, session.declared_mime())
                .await
                .map_err(UploadError::from)
        };

        let state = if outcome.is_ok() {
            SessionState::Finished
        } else {
            SessionState::Aborted
        };
        session.close(state);
        remove_scratch(session.scratch_path()).await;

        match outcome {
            Ok(path) => {
                tracing::info!(session_id = %id, name = %name, bytes = received, "Upload finished");
                Ok(StoredUpload {
                    name,
                    path,
                    bytes: received,
                })
            }
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Upload finish failed");
                Err(e)
            }
        }
    }

    /// Abort sessions idle for longer than the configured timeout.
    /// Returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    pub(crate) fn sweep_idle_at(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        self.sessions.retain(|_, session| {
            if session.is_idle(now, self.idle_timeout) {
                expired.push(Arc::clone(session));
                false
            } else {
                true
            }
        });

        for session in &expired {
            let received = session.close(SessionState::Aborted);
            if let Err(e) = std::fs::remove_file(session.scratch_path()) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(session_id = %session.id(), error = %e, "Failed to delete scratch file");
                }
            }
            tracing::info!(
                session_id = %session.id(),
                received,
                total = session.declared_total_size(),
                "Idle upload aborted"
            );
        }
        expired.len()
    }

    /// Run `sweep_idle` every `interval` until the manager is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let swept = manager.sweep_idle();
                if swept > 0 {
                    tracing::debug!(swept, remaining = manager.session_count(), "Upload sweep");
                }
            }
        })
    }
}

async fn remove_scratch(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete scratch file");
        }
    }
}
