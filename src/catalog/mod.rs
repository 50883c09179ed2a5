//! Item catalog
//!
//! The catalog is the ordered list of media the server is sharing. It is
//! replaced wholesale, never edited: readers grab an `Arc` to the current
//! [`CatalogSnapshot`] and keep a coherent view for as long as they hold it,
//! while `replace` swaps in a new snapshot under a short write lock.
//!
//! Entry ids are positions within one snapshot. They mean nothing across
//! versions, so every replacement bumps the version and notifies
//! [`CatalogListener`]s (the thumbnail cache clears itself).

mod error;
mod scanner;

pub use error::CatalogError;
pub use scanner::{guess_mime, scan_directory};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Opaque reference to the bytes behind an entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle {
    path: PathBuf,
}

impl MediaHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open for blocking reads
    pub fn open(&self) -> std::io::Result<std::fs::File> {
        std::fs::File::open(&self.path)
    }

    /// Open for async reads
    pub async fn open_async(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path).await
    }
}

/// One shareable item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
    id: usize,
    handle: MediaHandle,
    name: String,
    mime: String,
}

impl MediaEntry {
    /// Create an entry. Its id is assigned when it is placed in a catalog.
    pub fn new(handle: MediaHandle, name: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            id: 0,
            handle,
            name: name.into(),
            mime: mime.into(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn handle(&self) -> &MediaHandle {
        &self.handle
    }

    /// Display name, as picked by the user; may contain separators
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }
}

/// Immutable view of the catalog at one version
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    version: u64,
    entries: Vec<Arc<MediaEntry>>,
}

impl CatalogSnapshot {
    fn new(version: u64, entries: Vec<MediaEntry>) -> Self {
        let entries = entries
            .into_iter()
            .enumerate()
            .map(|(id, mut entry)| {
                entry.id = id;
                Arc::new(entry)
            })
            .collect();
        Self { version, entries }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Arc<MediaEntry>] {
        &self.entries
    }

    pub fn get(&self, id: usize) -> Result<Arc<MediaEntry>, CatalogError> {
        self.entries
            .get(id)
            .cloned()
            .ok_or(CatalogError::EntryNotFound { id })
    }
}

/// Notified after every catalog replacement
pub trait CatalogListener: Send + Sync {
    fn on_replace(&self, new_version: u64);
}

/// The live, replaceable catalog
pub struct ItemCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
    listeners: RwLock<Vec<Weak<dyn CatalogListener>>>,
}

impl Default for ItemCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ItemCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("ItemCatalog")
            .field("version", &snapshot.version)
            .field("entries", &snapshot.len())
            .finish()
    }
}

impl ItemCatalog {
    /// Empty catalog at version 0
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(CatalogSnapshot::default())),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Catalog pre-filled with `entries`
    pub fn with_entries(entries: Vec<MediaEntry>) -> Self {
        let catalog = Self::new();
        catalog.replace(entries);
        catalog
    }

    /// Current snapshot. Holding it pins that version.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.read().clone()
    }

    /// Resolve an id against the current snapshot
    pub fn get(&self, id: usize) -> Result<Arc<MediaEntry>, CatalogError> {
        self.snapshot().get(id)
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Swap in a new list. Ids are reassigned by position.
    pub fn replace(&self, entries: Vec<MediaEntry>) -> u64 {
        let count = entries.len();
        let version = {
            let mut current = self.current.write();
            let version = current.version + 1;
            *current = Arc::new(CatalogSnapshot::new(version, entries));
            version
        };

        tracing::info!(version, entries = count, "Catalog replaced");
        self.notify(version);
        version
    }

    /// Register a listener. Dropped listeners are pruned lazily.
    pub fn subscribe(&self, listener: Weak<dyn CatalogListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, version: u64) {
        let live: Vec<Arc<dyn CatalogListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_replace(version);
        }
    }
}
