//! Configuration module for LanShare
//!
//! Settings are layered with the `config` crate:
//! built-in defaults, then an optional TOML file, then `LANSHARE_`
//! environment variables (`LANSHARE_SERVER__PORT=9000`). The binary applies
//! command-line overrides on top and calls [`ShareConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::logging::LoggingConfig;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Default longest side of generated thumbnails, in pixels
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 240;

/// Default thumbnail cache budget (24 MiB)
pub const DEFAULT_THUMBNAIL_BUDGET: usize = 24 * 1024 * 1024;

/// Default folder walk depth for the catalog scanner
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub catalog: CatalogSection,
    pub thumbnail: ThumbnailSection,
    pub upload: UploadSection,
    pub archive: ArchiveSection,
    pub logging: LoggingConfig,
}

/// Listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind (all interfaces by default, this is a LAN server)
    pub bind: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Shared-secret settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Numeric PIN (4-6 digits). `None` disables access control.
    pub token: Option<SecretString>,
}

/// Catalog source settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// Folder to share
    pub root: Option<PathBuf>,
    /// Maximum folder depth walked below `root`
    pub max_depth: usize,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            root: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Thumbnail generation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThumbnailSection {
    /// Longest side of the generated preview
    pub target_size: u32,
    /// Total bytes of encoded previews kept in memory
    pub cache_budget_bytes: usize,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Offset into a video where the preview frame is taken
    pub video_frame_offset_ms: u64,
    /// ffmpeg executable used for video frames
    pub ffmpeg_path: PathBuf,
}

impl Default for ThumbnailSection {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_THUMBNAIL_SIZE,
            cache_budget_bytes: DEFAULT_THUMBNAIL_BUDGET,
            jpeg_quality: 80,
            video_frame_offset_ms: 1_000,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// What `finish` does when fewer bytes arrived than were declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizePolicy {
    /// Reject unless the high-water mark equals the declared size
    #[default]
    RequireComplete,
    /// Hand whatever arrived to the storage sink
    AllowPartial,
}

/// Upload settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    /// Where scratch files are assembled (system temp dir if unset)
    pub scratch_dir: Option<PathBuf>,
    /// Where finished uploads are placed
    pub destination_dir: PathBuf,
    /// Sessions untouched for this long are aborted
    pub idle_timeout_secs: u64,
    /// How often the idle sweep runs
    pub sweep_interval_secs: u64,
    pub finalize_policy: FinalizePolicy,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            destination_dir: default_destination_dir(),
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            finalize_policy: FinalizePolicy::default(),
        }
    }
}

impl UploadSection {
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Bulk-download pipe settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    /// Number of chunks buffered between producer and response body
    pub channel_depth: usize,
    /// Size of each buffered chunk in bytes
    pub chunk_size: usize,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            channel_depth: 16,
            chunk_size: 64 * 1024,
        }
    }
}

fn default_destination_dir() -> PathBuf {
    if let Some(pictures) = dirs::picture_dir() {
        pictures.join("LanShare")
    } else {
        PathBuf::from("received")
    }
}

impl ShareConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("LANSHARE")
                .prefix_separator("_")
                .separator("__"),
        );

        let config: ShareConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(token) = &self.auth.token {
            validate_pin(token.expose_secret())?;
        }
        if self.thumbnail.target_size == 0 {
            return Err(ConfigError::Invalid("thumbnail.target_size must be > 0".into()));
        }
        if self.thumbnail.cache_budget_bytes == 0 {
            return Err(ConfigError::Invalid(
                "thumbnail.cache_budget_bytes must be > 0".into(),
            ));
        }
        if !(1..=100).contains(&self.thumbnail.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "thumbnail.jpeg_quality must be between 1 and 100".into(),
            ));
        }
        if self.archive.channel_depth == 0 || self.archive.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "archive.channel_depth and archive.chunk_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// The configured PIN, if any
    pub fn token(&self) -> Option<&str> {
        self.auth.token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

/// A PIN is 4 to 6 ASCII digits
pub fn validate_pin(pin: &str) -> Result<(), ConfigError> {
    let ok = (4..=6).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid("PIN must be 4-6 digits".into()))
    }
}

/// Generate a random 6-digit PIN
pub fn generate_pin() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..6).map(|_| char::from(b'0' + rng.gen_range(0..10u8))).collect()
}
