//! Downsampling math and the final rescale + JPEG encode step

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView};

use super::ThumbnailError;

/// Largest power of two that keeps `longest / factor` above `4 * target`
pub fn sample_factor(longest: u32, target: u32) -> u32 {
    let limit = target.saturating_mul(4).max(1);
    let mut factor = 1u32;
    while longest / factor > limit && factor < (1 << 16) {
        factor *= 2;
    }
    factor
}

/// Output size with the longest side equal to `target`, aspect preserved
pub fn scaled_dimensions(width: u32, height: u32, target: u32) -> (u32, u32) {
    let longest = u64::from(width.max(height).max(1));
    let scale = |side: u32| (u64::from(side) * u64::from(target) / longest).max(1) as u32;
    (scale(width), scale(height))
}

/// Rescale to `target` on the longest side and encode as JPEG
pub fn encode_thumbnail(
    img: &DynamicImage,
    target: u32,
    quality: u8,
) -> Result<Bytes, ThumbnailError> {
    let (width, height) = img.dimensions();
    let (w, h) = scaled_dimensions(width, height, target);
    let rgb = img.resize_exact(w, h, FilterType::Triangle).to_rgb8();

    let mut out = Vec::with_capacity((w * h) as usize / 4);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| ThumbnailError::Encode {
            reason: e.to_string(),
        })?;
    Ok(Bytes::from(out))
}
