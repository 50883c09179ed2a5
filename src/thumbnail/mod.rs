//! On-demand thumbnails
//!
//! Previews are generated on first request, rescaled so the longest side
//! equals the requested size, encoded as JPEG and kept in a byte-budgeted
//! LRU cache that is invalidated whenever the catalog is replaced.

mod cache;
mod decoder;
mod error;
mod render;
#[cfg(test)]
mod tests;

pub use cache::{CacheKey, CacheStats, ThumbnailCache};
pub use decoder::{FfmpegFrameDecoder, MediaDecoder, MimeDispatchDecoder, StillImageDecoder};
pub use error::ThumbnailError;
pub use render::{encode_thumbnail, sample_factor, scaled_dimensions};

/// Mime type of every generated thumbnail
pub const THUMBNAIL_MIME: &str = "image/jpeg";
