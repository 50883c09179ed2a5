//! Tests for thumbnail generation and caching

use super::*;
use crate::catalog::{ItemCatalog, MediaEntry, MediaHandle};
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Decoder that fabricates a gradient and counts its calls
struct CountingDecoder {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingDecoder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MediaDecoder for CountingDecoder {
    fn decode(&self, entry: &MediaEntry, _target: u32) -> Result<DynamicImage, ThumbnailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ThumbnailError::Decode {
                reason: "corrupt".into(),
            });
        }
        let shade = (entry.id() * 40 % 255) as u8;
        let img = ImageBuffer::from_fn(640, 480, |x, y| Rgb([shade, (x % 255) as u8, (y % 255) as u8]));
        Ok(DynamicImage::ImageRgb8(img))
    }
}

fn fake_entries(count: usize) -> Vec<MediaEntry> {
    (0..count)
        .map(|i| {
            MediaEntry::new(
                MediaHandle::new(format!("/nowhere/{}.jpg", i)),
                format!("{}.jpg", i),
                "image/jpeg",
            )
        })
        .collect()
}

fn cache_with(decoder: Arc<CountingDecoder>, entries: usize, budget: usize) -> (Arc<ItemCatalog>, Arc<ThumbnailCache>) {
    let catalog = Arc::new(ItemCatalog::with_entries(fake_entries(entries)));
    let cache = ThumbnailCache::new(Arc::clone(&catalog), decoder, budget, 80);
    (catalog, cache)
}

#[test]
fn test_sample_factor() {
    assert_eq!(sample_factor(4000, 240), 8);
    assert_eq!(sample_factor(960, 240), 1);
    assert_eq!(sample_factor(961, 240), 2);
    assert_eq!(sample_factor(100, 240), 1);
    assert_eq!(sample_factor(12000, 240), 16);
}

#[test]
fn test_scaled_dimensions_keep_aspect() {
    assert_eq!(scaled_dimensions(4000, 3000, 240), (240, 180));
    assert_eq!(scaled_dimensions(1080, 1920, 240), (135, 240));
    assert_eq!(scaled_dimensions(100, 50, 240), (240, 120));
    assert_eq!(scaled_dimensions(5000, 1, 240), (240, 1));
}

#[test]
fn test_repeat_request_decodes_once() {
    let decoder = CountingDecoder::new();
    let (_catalog, cache) = cache_with(Arc::clone(&decoder), 3, 1024 * 1024);

    let first = cache.get_or_generate(1, 240).unwrap();
    let second = cache.get_or_generate(1, 240).unwrap();

    assert_eq!(first, second);
    assert_eq!(decoder.calls(), 1);
    assert_eq!(&first[..2], &[0xFF, 0xD8], "JPEG SOI marker");

    // Different target size is a different key.
    cache.get_or_generate(1, 120).unwrap();
    assert_eq!(decoder.calls(), 2);
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_output_is_rescaled_jpeg() {
    let decoder = CountingDecoder::new();
    let (_catalog, cache) = cache_with(decoder, 1, 1024 * 1024);

    let bytes = cache.get_or_generate(0, 240).unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!(decoded.dimensions(), (240, 180));
}

#[test]
fn test_unknown_entry_is_not_found_without_decoding() {
    let decoder = CountingDecoder::new();
    let (_catalog, cache) = cache_with(Arc::clone(&decoder), 2, 1024 * 1024);

    let err = cache.get_or_generate(7, 240).unwrap_err();
    assert!(matches!(err, ThumbnailError::EntryNotFound { id: 7 }));
    assert!(err.is_not_found());
    assert_eq!(decoder.calls(), 0);
}

#[test]
fn test_decode_failure_is_not_found_and_not_cached() {
    let decoder = CountingDecoder::failing();
    let (_catalog, cache) = cache_with(Arc::clone(&decoder), 1, 1024 * 1024);

    assert!(cache.get_or_generate(0, 240).unwrap_err().is_not_found());
    assert!(cache.get_or_generate(0, 240).is_err());
    assert_eq!(decoder.calls(), 2);
    assert!(cache.is_empty());
}

#[test]
fn test_catalog_replace_invalidates() {
    let decoder = CountingDecoder::new();
    let (catalog, cache) = cache_with(Arc::clone(&decoder), 2, 1024 * 1024);

    let before = cache.get_or_generate(0, 240).unwrap();
    assert_eq!(cache.len(), 1);

    // Same position, different media.
    let mut replacement = fake_entries(2);
    replacement.swap(0, 1);
    catalog.replace(replacement);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().catalog_version, 2);

    let after = cache.get_or_generate(0, 240).unwrap();
    assert_eq!(decoder.calls(), 2);
    assert_eq!(cache.total_bytes(), after.len());
    // Both previews are from id 0 of their own version.
    assert!(!before.is_empty() && !after.is_empty());
}

#[test]
fn test_eviction_keeps_within_budget() {
    let decoder = CountingDecoder::new();
    let (_catalog, cache) = cache_with(decoder, 3, 1000);

    assert!(cache.put(0, 240, Bytes::from(vec![0u8; 400])));
    assert!(cache.put(1, 240, Bytes::from(vec![1u8; 400])));
    assert!(cache.put(2, 240, Bytes::from(vec![2u8; 400])));

    assert!(cache.total_bytes() <= 1000);
    assert_eq!(cache.total_bytes(), 800);
    assert!(cache.get(0, 240).is_none(), "oldest entry evicted first");
    assert!(cache.get(1, 240).is_some());
    assert!(cache.get(2, 240).is_some());
}

#[test]
fn test_eviction_respects_recent_use() {
    let decoder = CountingDecoder::new();
    let (_catalog, cache) = cache_with(decoder, 3, 1000);

    cache.put(0, 240, Bytes::from(vec![0u8; 400]));
    cache.put(1, 240, Bytes::from(vec![1u8; 400]));
    assert!(cache.get(0, 240).is_some());
    cache.put(2, 240, Bytes::from(vec![2u8; 400]));

    assert!(cache.get(0, 240).is_some());
    assert!(cache.get(1, 240).is_none());
}

#[test]
fn test_oversized_entry_not_cached() {
    let decoder = CountingDecoder::new();
    let (_catalog, cache) = cache_with(decoder, 1, 1000);

    cache.put(0, 240, Bytes::from(vec![0u8; 300]));
    assert!(!cache.put(0, 120, Bytes::from(vec![0u8; 1001])));
    assert_eq!(cache.total_bytes(), 300);
}

#[test]
fn test_reinsert_same_key_replaces_accounting() {
    let decoder = CountingDecoder::new();
    let (_catalog, cache) = cache_with(decoder, 1, 1000);

    cache.put(0, 240, Bytes::from(vec![0u8; 300]));
    cache.put(0, 240, Bytes::from(vec![0u8; 500]));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.total_bytes(), 500);
}

#[test]
fn test_concurrent_inserts_keep_accounting() {
    let decoder = CountingDecoder::new();
    let (_catalog, cache) = cache_with(decoder, 1, 10_000);

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..500usize {
                    let size = 100 + (i * 37 + t * 11) % 900;
                    cache.put(i % 64, (t as u32) + 1, Bytes::from(vec![0u8; size]));
                    let _ = cache.get((i + 7) % 64, 1);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let (recount, tracked) = cache.recount_bytes();
    assert_eq!(recount, tracked);
    assert!(tracked <= 10_000);
}

#[test]
fn test_still_image_decoder_png() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wide.png");
    ImageBuffer::from_pixel(1000, 500, Rgb([10u8, 200, 30]))
        .save(&path)
        .unwrap();

    let entry = MediaEntry::new(MediaHandle::new(&path), "wide.png", "image/png");
    let img = StillImageDecoder::new().decode(&entry, 240).unwrap();
    // 1000px is above 4 x 240, so it is decoded at half size.
    assert_eq!(img.dimensions(), (500, 250));

    let jpeg = encode_thumbnail(&img, 240, 80).unwrap();
    assert_eq!(image::load_from_memory(&jpeg).unwrap().dimensions(), (240, 120));
}

#[test]
fn test_still_image_decoder_scaled_jpeg() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.jpg");
    ImageBuffer::from_pixel(4000, 2000, Rgb([90u8, 90, 90]))
        .save(&path)
        .unwrap();

    let entry = MediaEntry::new(MediaHandle::new(&path), "big.jpg", "image/jpeg");
    let img = StillImageDecoder::new().decode(&entry, 240).unwrap();
    let (w, h) = img.dimensions();
    assert!(w < 4000 && w >= 240, "decoded at reduced size, got {}x{}", w, h);
    assert_eq!(w, h * 2);
}

#[test]
fn test_still_image_decoder_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.jpg");
    std::fs::write(&path, b"definitely not an image").unwrap();

    let entry = MediaEntry::new(MediaHandle::new(&path), "broken.jpg", "image/jpeg");
    let err = StillImageDecoder::new().decode(&entry, 240).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_missing_ffmpeg_is_not_found() {
    let decoder = FfmpegFrameDecoder::new(
        "/definitely/missing/ffmpeg",
        std::time::Duration::from_secs(1),
    );
    let entry = MediaEntry::new(MediaHandle::new("/tmp/clip.mp4"), "clip.mp4", "video/mp4");
    assert!(decoder.decode(&entry, 240).unwrap_err().is_not_found());
}

#[test]
fn test_dispatch_by_mime() {
    let images = CountingDecoder::new();
    let videos = CountingDecoder::new();
    let dispatch = MimeDispatchDecoder::new(images.clone(), videos.clone());

    let photo = MediaEntry::new(MediaHandle::new("/a.heic"), "a.heic", "image/heic");
    let clip = MediaEntry::new(MediaHandle::new("/b.mov"), "b.mov", "video/quicktime");
    dispatch.decode(&photo, 240).unwrap();
    dispatch.decode(&clip, 240).unwrap();
    dispatch.decode(&clip, 240).unwrap();

    assert_eq!(images.calls(), 1);
    assert_eq!(videos.calls(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_resident_bytes_never_exceed_budget(
        budget in 1usize..4096,
        sizes in proptest::collection::vec(0usize..2048, 1..60),
    ) {
        let catalog = Arc::new(ItemCatalog::new());
        let cache = ThumbnailCache::new(catalog, CountingDecoder::new(), budget, 80);
        for (i, size) in sizes.iter().enumerate() {
            let admitted = cache.put(i % 16, 240, Bytes::from(vec![0u8; *size]));
            prop_assert_eq!(admitted, *size <= budget);
            prop_assert!(cache.total_bytes() <= budget);
        }
    }
}
