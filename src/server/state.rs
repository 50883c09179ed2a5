//! Shared state handed to every handler

use std::sync::Arc;

use crate::archive::ArchiveStreamer;
use crate::auth::AuthGate;
use crate::catalog::ItemCatalog;
use crate::core::ShareConfig;
use crate::thumbnail::ThumbnailCache;
use crate::upload::UploadSessionManager;

/// Options baked into the listing page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    /// Upload chunk size used by the browser client
    pub chunk_size: usize,
    /// Default number of files uploaded in parallel
    pub upload_concurrency: u32,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            upload_concurrency: 3,
        }
    }
}

/// Everything one server instance owns. Cheap to clone.
#[derive(Clone)]
pub struct ShareState {
    pub gate: Arc<AuthGate>,
    pub catalog: Arc<ItemCatalog>,
    pub thumbnails: Arc<ThumbnailCache>,
    pub uploads: Arc<UploadSessionManager>,
    pub archive: ArchiveStreamer,
    /// Default longest side for `/thumb` when no size is requested
    pub thumbnail_size: u32,
    pub page: PageOptions,
}

impl ShareState {
    /// Wire up fresh components from configuration with an empty catalog
    pub fn from_config(config: &ShareConfig) -> Self {
        let catalog = Arc::new(ItemCatalog::new());
        Self {
            gate: Arc::new(AuthGate::new(config.auth.token.clone())),
            thumbnails: ThumbnailCache::from_config(catalog.clone(), &config.thumbnail),
            uploads: Arc::new(UploadSessionManager::from_config(&config.upload)),
            archive: ArchiveStreamer::from_config(catalog.clone(), &config.archive),
            catalog,
            thumbnail_size: config.thumbnail.target_size,
            page: PageOptions::default(),
        }
    }
}

impl std::fmt::Debug for ShareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareState")
            .field("gate", &self.gate)
            .field("catalog", &self.catalog)
            .field("thumbnails", &self.thumbnails.stats())
            .field("uploads", &self.uploads)
            .field("thumbnail_size", &self.thumbnail_size)
            .finish()
    }
}
