//! Catalog error types

use std::path::PathBuf;
use thiserror::Error;

/// Catalog error type
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("No entry with id {id}")]
    EntryNotFound { id: usize },

    #[error("Catalog root is not a directory: {path}")]
    InvalidRoot { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::EntryNotFound { .. })
    }
}
