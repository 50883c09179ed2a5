//! Byte-bounded LRU cache of encoded thumbnails
//!
//! Entries are keyed by `(entry id, target size)`. Since ids are positions
//! in one catalog version, the cache is tagged with the version it holds
//! previews for: it clears itself when the catalog moves on, and refuses
//! inserts produced from any other version.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use super::decoder::{MediaDecoder, MimeDispatchDecoder};
use super::render::encode_thumbnail;
use super::ThumbnailError;
use crate::catalog::{CatalogListener, ItemCatalog};
use crate::core::ThumbnailSection;

/// Cache key: entry id and longest-side pixel size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entry_id: usize,
    pub target: u32,
}

impl CacheKey {
    pub fn new(entry_id: usize, target: u32) -> Self {
        Self { entry_id, target }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub budget_bytes: usize,
    pub catalog_version: u64,
}

struct CacheState {
    version: u64,
    entries: LruCache<CacheKey, Bytes>,
    total_bytes: usize,
}

impl CacheState {
    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Insert, evicting least recently used entries until it fits
    fn admit(&mut self, key: CacheKey, bytes: Bytes, budget: usize) -> bool {
        let size = bytes.len();
        if size > budget {
            return false;
        }
        if let Some(previous) = self.entries.pop(&key) {
            self.total_bytes -= previous.len();
        }
        while self.total_bytes + size > budget {
            match self.entries.pop_lru() {
                Some((victim, evicted)) => {
                    self.total_bytes -= evicted.len();
                    tracing::trace!(entry_id = victim.entry_id, bytes = evicted.len(), "Evicted thumbnail");
                }
                None => break,
            }
        }
        self.entries.put(key, bytes);
        self.total_bytes += size;
        true
    }
}

/// Thumbnail cache over the live catalog
pub struct ThumbnailCache {
    catalog: Arc<ItemCatalog>,
    decoder: Arc<dyn MediaDecoder>,
    budget_bytes: usize,
    jpeg_quality: u8,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ThumbnailCache {
    /// Create a cache and subscribe it to catalog replacements
    pub fn new(
        catalog: Arc<ItemCatalog>,
        decoder: Arc<dyn MediaDecoder>,
        budget_bytes: usize,
        jpeg_quality: u8,
    ) -> Arc<Self> {
        let cache = Arc::new(Self {
            state: Mutex::new(CacheState {
                version: catalog.version(),
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            catalog: Arc::clone(&catalog),
            decoder,
            budget_bytes,
            jpeg_quality,
        });
        let listener: Weak<dyn CatalogListener> = Arc::downgrade(&cache) as Weak<dyn CatalogListener>;
        catalog.subscribe(listener);
        cache
    }

    /// Cache with the default image/video decoders
    pub fn from_config(catalog: Arc<ItemCatalog>, config: &ThumbnailSection) -> Arc<Self> {
        Self::new(
            catalog,
            Arc::new(MimeDispatchDecoder::from_config(config)),
            config.cache_budget_bytes,
            config.jpeg_quality,
        )
    }

    /// Return the cached preview or build it.
    ///
    /// Blocks while decoding; async callers should run it on a blocking
    /// worker. Two concurrent misses for the same key may both decode.
    pub fn get_or_generate(&self, entry_id: usize, target: u32) -> Result<Bytes, ThumbnailError> {
        let snapshot = self.catalog.snapshot();
        let key = CacheKey::new(entry_id, target);

        {
            let mut state = self.state.lock();
            if snapshot.version() > state.version {
                state.version = snapshot.version();
                state.clear();
            }
            if state.version == snapshot.version() {
                if let Some(bytes) = state.entries.get(&key) {
                    return Ok(bytes.clone());
                }
            }
        }

        let entry = snapshot
            .get(entry_id)
            .map_err(|_| ThumbnailError::EntryNotFound { id: entry_id })?;

        let bytes = self
            .decoder
            .decode(&entry, target)
            .and_then(|img| encode_thumbnail(&img, target, self.jpeg_quality))
            .map_err(|e| {
                tracing::debug!(entry_id, name = entry.name(), error = %e, "Thumbnail generation failed");
                e
            })?;

        let mut state = self.state.lock();
        if state.version == snapshot.version() {
            state.admit(key, bytes.clone(), self.budget_bytes);
        }
        Ok(bytes)
    }

    /// Insert bytes for the current catalog version. Returns false when the
    /// entry alone exceeds the budget.
    pub fn put(&self, entry_id: usize, target: u32, bytes: Bytes) -> bool {
        let mut state = self.state.lock();
        state.admit(CacheKey::new(entry_id, target), bytes, self.budget_bytes)
    }

    /// Cached bytes, marking the entry as recently used
    pub fn get(&self, entry_id: usize, target: u32) -> Option<Bytes> {
        self.state
            .lock()
            .entries
            .get(&CacheKey::new(entry_id, target))
            .cloned()
    }

    pub fn clear(&self) {
        self.state.lock().clear();
    }

    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// Recomputed resident bytes next to the tracked total
    #[cfg(test)]
    pub(crate) fn recount_bytes(&self) -> (usize, usize) {
        let state = self.state.lock();
        let recount = state.entries.iter().map(|(_, v)| v.len()).sum();
        (recount, state.total_bytes)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            budget_bytes: self.budget_bytes,
            catalog_version: state.version,
        }
    }
}

impl CatalogListener for ThumbnailCache {
    fn on_replace(&self, new_version: u64) {
        let mut state = self.state.lock();
        if new_version > state.version {
            state.version = new_version;
        }
        let dropped = state.entries.len();
        state.clear();
        tracing::debug!(version = new_version, dropped, "Thumbnail cache invalidated");
    }
}
