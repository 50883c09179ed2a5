//! Resumable upload client
//!
//! Speaks the same three-phase protocol as the browser page: `upload_init`,
//! sequential `upload_chunk` calls at explicit offsets, then
//! `upload_finish`. A failed chunk is re-sent at the same offset, which the
//! server treats as a harmless overwrite. `upload_init` and `upload_finish`
//! are sent once: a repeated init leaves an orphan session and a repeated
//! finish only ever sees the session already consumed.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use url::Url;

use crate::auth::QUERY_PARAM;
use crate::catalog::guess_mime;
use crate::core::utils::percent_encode;
use crate::upload::MAX_CHUNK_BYTES;

/// Default chunk size, matching the browser client
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Error types for the upload client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Server rejected {path} ({status}): {message}")]
    Rejected {
        path: String,
        status: u16,
        message: String,
    },

    #[error("Giving up on {path} after {attempts} attempts")]
    RetriesExhausted { path: String, attempts: u32 },

    #[error("Not a file: {path}")]
    NotAFile { path: String },
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Upload client configuration
#[derive(Debug, Clone)]
pub struct UploadClientConfig {
    /// Server root, e.g. `http://192.168.1.20:8080/`
    pub base_url: Url,
    /// PIN, sent as the `t` query parameter
    pub token: Option<String>,
    pub chunk_size: usize,
    /// Attempts per request before giving up
    pub max_retries: u32,
    /// Per-request timeout
    pub timeout: Duration,
}

impl UploadClientConfig {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            token: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: 3,
            timeout: Duration::from_secs(60),
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_BYTES as usize);
        self
    }
}

/// Progress of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub name: String,
    pub sent: u64,
    pub total: u64,
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Sends files to a LanShare server
pub struct UploadClient {
    config: UploadClientConfig,
    client: reqwest::Client,
    progress_callback: Option<ProgressCallback>,
}

impl UploadClient {
    pub fn new(config: UploadClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            progress_callback: None,
        })
    }

    /// Set progress callback
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &UploadClientConfig {
        &self.config
    }

    /// Upload one file. Returns the session id the server assigned.
    pub async fn upload_file(&self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ClientError::NotAFile {
                path: path.display().to_string(),
            })?;
        let mime = guess_mime(path).unwrap_or("application/octet-stream");

        let mut file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(ClientError::NotAFile {
                path: path.display().to_string(),
            });
        }
        let total = metadata.len();

        let size = total.to_string();
        let encoded_name = percent_encode(&name);
        let id = self
            .post(
                "upload_init",
                &[
                    ("x-name", encoded_name.as_str()),
                    ("x-size", size.as_str()),
                    ("x-mime", mime),
                ],
                Bytes::new(),
                1,
            )
            .await?;
        let id = id.trim().to_string();
        tracing::info!(session_id = %id, name = %name, total, "Upload session opened");

        let mut offset: u64 = 0;
        let mut buf = vec![0u8; self.config.chunk_size];
        while offset < total {
            let len = (total - offset).min(self.config.chunk_size as u64) as usize;
            file.read_exact(&mut buf[..len]).await?;
            let chunk = Bytes::copy_from_slice(&buf[..len]);

            let offset_header = offset.to_string();
            self.post(
                "upload_chunk",
                &[
                    ("x-id", id.as_str()),
                    ("x-offset", offset_header.as_str()),
                    ("x-total", size.as_str()),
                ],
                chunk,
                self.config.max_retries,
            )
            .await?;
            offset += len as u64;

            tracing::debug!(session_id = %id, offset, total, "Chunk acknowledged");
            if let Some(callback) = &self.progress_callback {
                callback(UploadProgress {
                    name: name.clone(),
                    sent: offset,
                    total,
                });
            }
        }

        self.post("upload_finish", &[("x-id", id.as_str())], Bytes::new(), 1)
            .await?;
        tracing::info!(session_id = %id, name = %name, bytes = total, "Upload complete");
        Ok(id)
    }

    /// URL for an endpoint, carrying the PIN when one is configured
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.config.base_url.join(path)?;
        if let Some(token) = &self.config.token {
            url.query_pairs_mut().append_pair(QUERY_PARAM, token);
        }
        Ok(url)
    }

    /// POST, making up to `attempts` tries. Client errors (4xx) are never
    /// retried. A single-attempt request reports the server's own failure.
    async fn post(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
        attempts: u32,
    ) -> Result<String> {
        let url = self.endpoint(path)?;
        let attempts = attempts.max(1);

        for attempt in 0..attempts {
            let mut request = self.client.post(url.clone()).body(body.clone());
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        return Ok(text);
                    }
                    if status.is_client_error() || attempts == 1 {
                        return Err(ClientError::Rejected {
                            path: path.to_string(),
                            status: status.as_u16(),
                            message: text,
                        });
                    }
                    tracing::warn!(
                        path,
                        attempt = attempt + 1,
                        status = status.as_u16(),
                        "Server error, retrying"
                    );
                }
                Err(e) if attempts == 1 => return Err(ClientError::Network(e)),
                Err(e) => {
                    tracing::warn!(path, attempt = attempt + 1, error = %e, "Request failed, retrying");
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(Duration::from_millis(200 * (1 << attempt.min(5)))).await;
            }
        }

        Err(ClientError::RetriesExhausted {
            path: path.to_string(),
            attempts,
        })
    }
}
