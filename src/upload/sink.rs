//! Permanent storage for finished uploads

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};

use super::SinkError;

/// Places a finished upload somewhere durable
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Copy `source` into storage under `name`. Returns where it landed.
    async fn store(&self, source: &Path, name: &str, mime: &str) -> Result<PathBuf, SinkError>;
}

/// Sink that copies uploads into one directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

/// Give up looking for a free name after this many attempts
const MAX_NAME_ATTEMPTS: u32 = 10_000;

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `name`, or `stem (2).ext`, `stem (3).ext`, ... if it is taken
    async fn claim_unique(&self, name: &str) -> Result<(PathBuf, fs::File), SinkError> {
        let (stem, ext) = split_name(name);
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 1 {
                self.root.join(name)
            } else {
                self.root.join(format!("{} ({}){}", stem, attempt, ext))
            };
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(SinkError::Io(e)),
            }
        }
        Err(SinkError::Rejected {
            reason: format!("no free file name for {}", name),
        })
    }
}

#[async_trait]
impl StorageSink for DirectorySink {
    async fn store(&self, source: &Path, name: &str, mime: &str) -> Result<PathBuf, SinkError> {
        fs::create_dir_all(&self.root).await?;
        let (target, mut out) = self.claim_unique(name).await?;

        let copied = async {
            let mut input = fs::File::open(source).await?;
            let bytes = tokio::io::copy(&mut input, &mut out).await?;
            out.sync_all().await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;

        match copied {
            Ok(bytes) => {
                tracing::info!(path = %target.display(), bytes, mime, "Stored upload");
                Ok(target)
            }
            Err(e) => {
                drop(out);
                let _ = fs::remove_file(&target).await;
                Err(SinkError::Io(e))
            }
        }
    }
}

/// `"a.b.jpg"` -> `("a.b", ".jpg")`; a leading dot is not an extension
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("IMG_1.HEIC"), ("IMG_1", ".HEIC"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name(".hidden"), (".hidden", ""));
        assert_eq!(split_name("plain"), ("plain", ""));
    }

    #[tokio::test]
    async fn test_directory_sink_uniquifies_names() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("part");
        std::fs::write(&source, b"hello").unwrap();

        let sink = DirectorySink::new(dest_dir.path().join("roll"));
        let first = sink.store(&source, "IMG_1.jpg", "image/jpeg").await.unwrap();
        let second = sink.store(&source, "IMG_1.jpg", "image/jpeg").await.unwrap();
        let third = sink.store(&source, "IMG_1.jpg", "image/jpeg").await.unwrap();

        assert_eq!(first.file_name().unwrap(), "IMG_1.jpg");
        assert_eq!(second.file_name().unwrap(), "IMG_1 (2).jpg");
        assert_eq!(third.file_name().unwrap(), "IMG_1 (3).jpg");
        assert_eq!(std::fs::read(&third).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_directory_sink_missing_source_cleans_up() {
        let dest_dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dest_dir.path());
        let result = sink
            .store(Path::new("/definitely/missing/part"), "x.jpg", "image/jpeg")
            .await;
        assert!(matches!(result, Err(SinkError::Io(_))));
        assert!(!dest_dir.path().join("x.jpg").exists());
    }
}
