//! Media decoders
//!
//! A decoder turns a catalog entry into pixels at roughly the requested
//! size. The cache does the final rescale and encode, so decoders only need
//! to avoid materialising huge originals at full resolution.

use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use image::codecs::jpeg::JpegDecoder;
use image::io::Reader as ImageReader;
use image::{DynamicImage, ImageFormat};

use super::render::sample_factor;
use super::ThumbnailError;
use crate::catalog::MediaEntry;
use crate::core::ThumbnailSection;

/// Produces a preview image for one entry
pub trait MediaDecoder: Send + Sync {
    fn decode(&self, entry: &MediaEntry, target: u32) -> Result<DynamicImage, ThumbnailError>;
}

/// Still images via the `image` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct StillImageDecoder;

impl StillImageDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_jpeg_scaled(
        path: &std::path::Path,
        width: u32,
        height: u32,
        factor: u32,
    ) -> Result<DynamicImage, ThumbnailError> {
        let file = std::fs::File::open(path)?;
        let mut decoder = JpegDecoder::new(BufReader::new(file)).map_err(ThumbnailError::decode)?;
        let req_w = u16::try_from(width / factor).unwrap_or(u16::MAX);
        let req_h = u16::try_from(height / factor).unwrap_or(u16::MAX);
        decoder
            .scale(req_w.max(1), req_h.max(1))
            .map_err(ThumbnailError::decode)?;
        DynamicImage::from_decoder(decoder).map_err(ThumbnailError::decode)
    }
}

impl MediaDecoder for StillImageDecoder {
    fn decode(&self, entry: &MediaEntry, target: u32) -> Result<DynamicImage, ThumbnailError> {
        let path = entry.handle().path();

        // Header only; no pixel data yet.
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader.format();
        let (width, height) = reader.into_dimensions().map_err(ThumbnailError::decode)?;
        if width == 0 || height == 0 {
            return Err(ThumbnailError::decode("image has no pixels"));
        }

        let factor = sample_factor(width.max(height), target);
        if factor > 1 && format == Some(ImageFormat::Jpeg) {
            tracing::trace!(entry_id = entry.id(), factor, "Scaled JPEG decode");
            return Self::decode_jpeg_scaled(path, width, height, factor);
        }

        let img = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(ThumbnailError::decode)?;
        if factor > 1 {
            Ok(img.thumbnail((width / factor).max(1), (height / factor).max(1)))
        } else {
            Ok(img)
        }
    }
}

/// Video frames via an external `ffmpeg` process
#[derive(Debug, Clone)]
pub struct FfmpegFrameDecoder {
    ffmpeg_path: PathBuf,
    offset: Duration,
}

impl FfmpegFrameDecoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, offset: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            offset,
        }
    }

    fn extract_frame(&self, entry: &MediaEntry, offset: Duration) -> Result<Vec<u8>, ThumbnailError> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-ss"])
            .arg(format!("{:.3}", offset.as_secs_f64()))
            .arg("-i")
            .arg(entry.handle().path())
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ThumbnailError::decode(format!("cannot run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ThumbnailError::decode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl MediaDecoder for FfmpegFrameDecoder {
    fn decode(&self, entry: &MediaEntry, _target: u32) -> Result<DynamicImage, ThumbnailError> {
        let mut frame = self.extract_frame(entry, self.offset)?;
        // Clips shorter than the offset yield no frame; take the first one.
        if frame.is_empty() && !self.offset.is_zero() {
            frame = self.extract_frame(entry, Duration::ZERO)?;
        }
        if frame.is_empty() {
            return Err(ThumbnailError::decode("no video frame"));
        }
        image::load_from_memory_with_format(&frame, ImageFormat::Png).map_err(ThumbnailError::decode)
    }
}

/// Routes `video/*` entries to one decoder and everything else to another
#[derive(Clone)]
pub struct MimeDispatchDecoder {
    image: Arc<dyn MediaDecoder>,
    video: Arc<dyn MediaDecoder>,
}

impl MimeDispatchDecoder {
    pub fn new(image: Arc<dyn MediaDecoder>, video: Arc<dyn MediaDecoder>) -> Self {
        Self { image, video }
    }

    pub fn from_config(config: &ThumbnailSection) -> Self {
        Self::new(
            Arc::new(StillImageDecoder::new()),
            Arc::new(FfmpegFrameDecoder::new(
                config.ffmpeg_path.clone(),
                Duration::from_millis(config.video_frame_offset_ms),
            )),
        )
    }
}

impl MediaDecoder for MimeDispatchDecoder {
    fn decode(&self, entry: &MediaEntry, target: u32) -> Result<DynamicImage, ThumbnailError> {
        if entry.is_video() {
            self.video.decode(entry, target)
        } else {
            self.image.decode(entry, target)
        }
    }
}
