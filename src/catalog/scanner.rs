//! Folder walker that produces catalog entries

use std::path::Path;

use walkdir::WalkDir;

use super::{CatalogError, MediaEntry, MediaHandle};

/// Extension to mime type, for the media kinds the catalog shares
const MIME_TABLE: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("avif", "image/avif"),
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("mov", "video/quicktime"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
    ("avi", "video/x-msvideo"),
    ("3gp", "video/3gpp"),
];

/// Guess a mime type from the file extension
pub fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    MIME_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Collect the images and videos under `root`.
///
/// Files directly in `root` are at depth 0; subfolders are descended
/// until they are more than `max_depth` levels below it. Entries come
/// back sorted by path within each folder so rescans are stable.
pub fn scan_directory(root: &Path, max_depth: usize) -> Result<Vec<MediaEntry>, CatalogError> {
    if !root.is_dir() {
        return Err(CatalogError::InvalidRoot {
            path: root.to_path_buf(),
        });
    }

    let mut entries = Vec::new();
    for result in WalkDir::new(root)
        .follow_links(false)
        .max_depth(max_depth.saturating_add(1))
        .sort_by_file_name()
    {
        let dir_entry = match result {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable path during scan");
                continue;
            }
        };
        if !dir_entry.file_type().is_file() {
            continue;
        }

        let path = dir_entry.path();
        let Some(mime) = guess_mime(path) else {
            continue;
        };
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        entries.push(MediaEntry::new(MediaHandle::new(path), name, mime));
    }

    tracing::debug!(root = %root.display(), found = entries.len(), "Scan complete");
    Ok(entries)
}
