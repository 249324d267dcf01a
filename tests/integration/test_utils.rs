//! Test utilities for integration tests.
//!
//! Synthetic source images, a source that records every read, and helpers
//! to build pyramids into memory.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, Luma, Rgb, RgbImage};

use dzi_pyramid::{
    BuildOptions, DeepZoomReader, EntrySource, ImageSource, InMemorySource, MemoryStorage,
    PyramidBuilder, PyramidError, Raster, Rect, StorageError,
};

// =============================================================================
// Synthetic Images
// =============================================================================

/// An RGB image with a distinct gradient in each channel.
pub fn gradient_rgb(width: u32, height: u32) -> Raster {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x * 7 + y * 13) % 256) as u8,
        ])
    });
    Raster::from_dynamic(DynamicImage::ImageRgb8(image))
}

/// A 16-bit gray diagonal gradient.
pub fn gradient_gray16(width: u32, height: u32) -> Raster {
    let image: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(width, height, |x, y| Luma([((x + y) * 97 % 65536) as u16]));
    Raster::from_dynamic(DynamicImage::ImageLuma16(image))
}

pub fn options(parallelism: usize, cache_fraction: f32) -> BuildOptions {
    BuildOptions {
        parallelism,
        cache_fraction,
    }
}

// =============================================================================
// Tracking Source
// =============================================================================

/// A source that records every region it is asked for.
pub struct TrackingSource {
    inner: InMemorySource,
    reads: Mutex<Vec<Rect>>,
    read_count: AtomicUsize,
    fail_on: Option<Rect>,
}

impl TrackingSource {
    pub fn new(raster: Raster) -> Self {
        Self {
            inner: InMemorySource::new(raster),
            reads: Mutex::new(Vec::new()),
            read_count: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// Fail any read that overlaps `region`.
    pub fn failing_on(mut self, region: Rect) -> Self {
        self.fail_on = Some(region);
        self
    }

    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> Vec<Rect> {
        self.reads.lock().unwrap().clone()
    }
}

impl ImageSource for TrackingSource {
    fn width(&self) -> u32 {
        self.inner.width()
    }

    fn height(&self) -> u32 {
        self.inner.height()
    }

    fn read_region(&self, region: Rect) -> Result<Raster, PyramidError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        self.reads.lock().unwrap().push(region);

        if let Some(fail_on) = self.fail_on {
            if !region.intersection(&fail_on).is_empty() {
                return Err(PyramidError::Decode {
                    message: format!("unreadable region {region}"),
                });
            }
        }
        self.inner.read_region(region)
    }
}

// =============================================================================
// In-Memory Pyramids
// =============================================================================

/// Memory storage shared between a builder run and a reader.
#[derive(Clone, Default)]
pub struct SharedStorage(pub Arc<MemoryStorage>);

impl EntrySource for SharedStorage {
    fn read_entry(&self, path: &str) -> Result<Bytes, StorageError> {
        self.0.read_entry(path)
    }
}

/// Build `source` into memory under the name `img`.
pub fn build_in_memory(
    source: &dyn ImageSource,
    builder: &PyramidBuilder,
    options: &BuildOptions,
) -> SharedStorage {
    let storage = SharedStorage::default();
    builder
        .build(source, "img", storage.0.as_ref(), options)
        .unwrap();
    storage
}

/// Build `raster` into memory and open a reader over the result.
pub fn reader_for(raster: Raster, tile_size: u32, overlap: u32) -> DeepZoomReader {
    let builder = PyramidBuilder::new(tile_size, overlap, "png", "dzi").unwrap();
    let storage = build_in_memory(&InMemorySource::new(raster), &builder, &options(2, 0.0));
    DeepZoomReader::from_source(Box::new(storage), "img.dzi").unwrap()
}

/// All entries of a pyramid, keyed by path.
pub fn entries(storage: &SharedStorage) -> BTreeMap<String, Bytes> {
    storage.0.entries()
}
