//! LanShare - share a folder of photos and videos over the local network
//!
//! This crate provides:
//! - PIN gate with a one-time cookie handshake
//! - Atomically replaceable media catalog
//! - Bounded LRU thumbnail cache with image and video-frame decoders
//! - Resumable chunked uploads with idle-session sweeping
//! - Streaming bulk download through a bounded pipe
//! - The HTTP router and a matching upload client

pub mod archive;
pub mod auth;
pub mod catalog;
pub mod client;
pub mod core;
pub mod logging;
pub mod server;
pub mod thumbnail;
pub mod upload;

// Re-export commonly used items
pub use crate::archive::{ArchiveError, ArchiveStreamer};
pub use crate::auth::{AuthGate, AuthGrant, AuthRequest};
pub use crate::catalog::{ItemCatalog, MediaEntry, MediaHandle};
pub use crate::client::{UploadClient, UploadClientConfig};
pub use crate::core::config::ShareConfig;
pub use crate::core::error::{Result, ShareError};
pub use crate::server::{ShareServer, ShareState};
pub use crate::thumbnail::ThumbnailCache;
pub use crate::upload::{DirectorySink, StorageSink, UploadSessionManager};
