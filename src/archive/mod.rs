//! Streaming bulk download
//!
//! The archive is a ZIP of stored entries. Sizes travel in data descriptors
//! after each entry, so the output never needs seeking. It is built by a
//! producer on a blocking worker and written into
//! a bounded channel; the HTTP response body drains the other end. A full
//! channel blocks the producer, and a dropped body makes its next send fail,
//! which stops the producer.

mod writer;

use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::catalog::{CatalogSnapshot, ItemCatalog, MediaEntry};
use crate::core::utils::archive_entry_name;
use crate::core::ArchiveSection;
use writer::ChannelWriter;

/// Mime type of the archive response
pub const ARCHIVE_MIME: &str = "application/zip";

/// Download file name of the archive
pub const ARCHIVE_FILE_NAME: &str = "media.zip";

/// Entries at least this large need ZIP64 records
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

const COPY_BUFFER_BYTES: usize = 64 * 1024;

/// Archive producer error type
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive consumer went away")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Zip error: {0}")]
    Zip(ZipError),
}

/// What a finished producer wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub skipped: usize,
    /// Entries whose file yielded fewer bytes than its size at open time
    pub truncated: usize,
    pub bytes: u64,
}

/// Builds archives of the current catalog snapshot
#[derive(Debug, Clone)]
pub struct ArchiveStreamer {
    catalog: Arc<ItemCatalog>,
    channel_depth: usize,
    chunk_size: usize,
}

impl ArchiveStreamer {
    pub fn new(catalog: Arc<ItemCatalog>, channel_depth: usize, chunk_size: usize) -> Self {
        Self {
            catalog,
            channel_depth: channel_depth.max(1),
            chunk_size: chunk_size.max(512),
        }
    }

    pub fn from_config(catalog: Arc<ItemCatalog>, config: &ArchiveSection) -> Self {
        Self::new(catalog, config.channel_depth, config.chunk_size)
    }

    /// Byte stream of an archive over the snapshot current right now
    pub fn stream_archive(&self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        self.spawn().0
    }

    /// Start a producer; returns the byte stream and the producer's handle
    pub fn spawn(
        &self,
    ) -> (
        impl Stream<Item = io::Result<Bytes>> + Send + 'static,
        JoinHandle<Result<ArchiveSummary, ArchiveError>>,
    ) {
        let snapshot = self.catalog.snapshot();
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(self.channel_depth);
        let chunk_size = self.chunk_size;

        tracing::info!(
            version = snapshot.version(),
            entries = snapshot.len(),
            "Archive stream started"
        );

        let handle = tokio::task::spawn_blocking(move || {
            let error_tx = tx.clone();
            let result = write_archive(&snapshot, ChannelWriter::new(tx, chunk_size));
            match &result {
                Ok(summary) => tracing::info!(
                    entries = summary.entries,
                    skipped = summary.skipped,
                    truncated = summary.truncated,
                    bytes = summary.bytes,
                    "Archive stream complete"
                ),
                Err(ArchiveError::Disconnected) => {
                    tracing::debug!("Archive consumer disconnected, producer stopped")
                }
                Err(e) => {
                    tracing::error!(error = %e, "Archive producer failed");
                    let _ = error_tx.blocking_send(Err(io::Error::new(
                        io::ErrorKind::Other,
                        "archive generation failed",
                    )));
                }
            }
            result
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (stream, handle)
    }
}

fn write_archive(
    snapshot: &CatalogSnapshot,
    writer: ChannelWriter,
) -> Result<ArchiveSummary, ArchiveError> {
    let mut zip = ZipWriter::new_stream(writer);
    let mut summary = ArchiveSummary::default();
    let mut buf = vec![0u8; COPY_BUFFER_BYTES];

    for entry in snapshot.entries() {
        let name = archive_entry_name(entry.name());
        let (mut file, size) = match open_entry(entry) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(entry_id = entry.id(), name = %name, error = %e, "Skipping unreadable entry");
                summary.skipped += 1;
                continue;
            }
        };

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(size >= ZIP64_THRESHOLD);
        zip.start_file(name.clone(), options).map_err(zip_error)?;

        let copied = copy_entry(&mut file, size, &mut zip, &mut buf).map_err(disconnect_aware)?;
        if copied < size {
            tracing::warn!(entry_id = entry.id(), name = %name, copied, size, "Entry ended early");
            summary.truncated += 1;
        }
        summary.entries += 1;
        summary.bytes += copied;
    }

    let mut writer = zip.finish().map_err(zip_error)?;
    io::Write::flush(&mut writer).map_err(disconnect_aware)?;
    Ok(summary)
}

/// Open an entry's backing file. Anything but a regular file is refused.
fn open_entry(entry: &MediaEntry) -> io::Result<(File, u64)> {
    let file = entry.handle().open()?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    Ok((file, metadata.len()))
}

/// Copy at most `size` bytes and return how many were copied.
///
/// A failed read ends the entry early; only write failures are errors, so
/// one bad file never costs the rest of the archive.
pub(super) fn copy_entry<R: Read, W: Write>(
    reader: &mut R,
    size: u64,
    out: &mut W,
    buf: &mut [u8],
) -> io::Result<u64> {
    let mut copied = 0u64;
    while copied < size {
        let want = (size - copied).min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, copied, size, "Entry read failed");
                break;
            }
        };
        out.write_all(&buf[..n])?;
        copied += n as u64;
    }
    Ok(copied)
}

fn zip_error(e: ZipError) -> ArchiveError {
    match e {
        ZipError::Io(e) => disconnect_aware(e),
        other => ArchiveError::Zip(other),
    }
}

fn disconnect_aware(e: io::Error) -> ArchiveError {
    if e.kind() == io::ErrorKind::BrokenPipe {
        ArchiveError::Disconnected
    } else {
        ArchiveError::Io(e)
    }
}
