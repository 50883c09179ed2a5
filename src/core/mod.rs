//! LanShare Core Module
//!
//! This module contains the pieces shared by every component:
//! - Configuration loading and validation
//! - The request-level error taxonomy
//! - Name sanitizers and small formatting helpers

pub mod config;
pub mod error;
pub mod utils;

// Re-export commonly used items
pub use config::{
    ArchiveSection, AuthSection, CatalogSection, ConfigError, FinalizePolicy, ServerSection,
    ShareConfig, ThumbnailSection, UploadSection,
};
pub use error::{Result, ShareError};
