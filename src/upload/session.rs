//! Per-upload state

use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempPath;

/// Lifecycle of one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no bytes yet
    Open,
    /// At least one chunk written
    Receiving,
    /// Handed to the storage sink (or rejected by `finish`)
    Finished,
    /// Dropped by the idle sweep
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Aborted)
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    pub id: String,
    pub name: String,
    pub state: SessionState,
    pub received: u64,
    pub total: u64,
}

#[derive(Debug)]
struct Progress {
    state: SessionState,
    high_water_mark: u64,
    last_activity: Instant,
    writers: usize,
}

/// One resumable upload.
///
/// The scratch file is removed when the session is dropped, so a session
/// that leaves the table without `finish` still frees its disk space.
#[derive(Debug)]
pub struct UploadSession {
    id: String,
    declared_name: String,
    declared_mime: String,
    declared_total_size: u64,
    scratch: TempPath,
    progress: Mutex<Progress>,
}

impl UploadSession {
    pub(crate) fn new(
        id: String,
        declared_name: String,
        declared_mime: String,
        declared_total_size: u64,
        scratch: TempPath,
    ) -> Self {
        Self {
            id,
            declared_name,
            declared_mime,
            declared_total_size,
            scratch,
            progress: Mutex::new(Progress {
                state: SessionState::Open,
                high_water_mark: 0,
                last_activity: Instant::now(),
                writers: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn declared_name(&self) -> &str {
        &self.declared_name
    }

    pub fn declared_mime(&self) -> &str {
        &self.declared_mime
    }

    pub fn declared_total_size(&self) -> u64 {
        self.declared_total_size
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch
    }

    pub fn high_water_mark(&self) -> u64 {
        self.progress.lock().high_water_mark
    }

    pub fn state(&self) -> SessionState {
        self.progress.lock().state
    }

    pub fn status(&self) -> UploadStatus {
        let progress = self.progress.lock();
        UploadStatus {
            id: self.id.clone(),
            name: self.declared_name.clone(),
            state: progress.state,
            received: progress.high_water_mark,
            total: self.declared_total_size,
        }
    }

    /// Register a chunk writer. `None` once the session is terminal.
    pub(crate) fn begin_write(&self) -> Option<WriteGuard<'_>> {
        let mut progress = self.progress.lock();
        if progress.state.is_terminal() {
            return None;
        }
        progress.writers += 1;
        progress.last_activity = Instant::now();
        Some(WriteGuard { session: self })
    }

    /// Raise the high-water mark; never lowers it
    pub(crate) fn record_write(&self, end: u64) -> u64 {
        let mut progress = self.progress.lock();
        progress.high_water_mark = progress.high_water_mark.max(end);
        progress.last_activity = Instant::now();
        if progress.state == SessionState::Open {
            progress.state = SessionState::Receiving;
        }
        progress.high_water_mark
    }

    /// Move to a terminal state, returning the final high-water mark
    pub(crate) fn close(&self, state: SessionState) -> u64 {
        let mut progress = self.progress.lock();
        progress.state = state;
        progress.high_water_mark
    }

    /// Idle means no writer in flight and no activity within `timeout`
    pub(crate) fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        let progress = self.progress.lock();
        progress.writers == 0 && now.saturating_duration_since(progress.last_activity) >= timeout
    }
}

/// Keeps a session out of the idle sweep while a chunk is being written
pub(crate) struct WriteGuard<'a> {
    session: &'a UploadSession,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut progress = self.session.progress.lock();
        progress.writers = progress.writers.saturating_sub(1);
        progress.last_activity = Instant::now();
    }
}
