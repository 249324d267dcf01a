//! Access to the image being tiled.
//!
//! The builder only ever asks a source for rectangles of the full resolution
//! image. Implementations must allow concurrent reads from several workers.

mod tiff_chunked;

use std::path::Path;

use tracing::debug;

use crate::error::PyramidError;
use crate::pyramid::Rect;
use crate::raster::{codec, Raster};

pub use tiff_chunked::TiffSource;

/// Read-only access to a full resolution image.
pub trait ImageSource: Send + Sync {
    /// Width of the image in pixels.
    fn width(&self) -> u32;

    /// Height of the image in pixels.
    fn height(&self) -> u32;

    /// Read a rectangle of the image.
    ///
    /// # Errors
    ///
    /// Empty rectangles and rectangles not fully inside the image are
    /// rejected before any pixel is read.
    fn read_region(&self, region: Rect) -> Result<Raster, PyramidError>;

    /// Read the whole image.
    fn read(&self) -> Result<Raster, PyramidError> {
        self.read_region(self.bounds())
    }

    /// Rectangle covering the whole image.
    fn bounds(&self) -> Rect {
        Rect::from_size(self.width(), self.height())
    }
}

/// Reject an empty region or one that does not fit in `bounds`.
pub fn check_region(region: Rect, bounds: Rect) -> Result<(), PyramidError> {
    if region.is_empty() {
        return Err(PyramidError::EmptyRegion);
    }
    if !bounds.contains(&region) {
        return Err(PyramidError::RegionOutOfBounds { region, bounds });
    }
    Ok(())
}

/// Open an image file as a source.
///
/// TIFF files are read chunk by chunk when their pixel format allows it;
/// everything else is decoded into memory up front.
///
/// # Errors
///
/// Returns [`PyramidError::Decode`] if the file cannot be read or decoded.
pub fn open_source(path: &Path) -> Result<Box<dyn ImageSource>, PyramidError> {
    let is_tiff = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"));

    if is_tiff {
        match TiffSource::open(path) {
            Ok(source) => return Ok(Box::new(source)),
            Err(PyramidError::UnsupportedFormat { format }) => {
                debug!(path = %path.display(), %format, "TIFF not chunk readable, decoding whole image");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Box::new(InMemorySource::open(path)?))
}

/// A source fully decoded in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    raster: Raster,
}

impl InMemorySource {
    pub fn new(raster: Raster) -> Self {
        Self { raster }
    }

    /// Decode an image file.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::Decode`] if the file cannot be read or decoded.
    pub fn open(path: &Path) -> Result<Self, PyramidError> {
        let raster = codec::decode_file(path)?;
        debug!(
            path = %path.display(),
            width = raster.width(),
            height = raster.height(),
            layout = ?raster.layout(),
            sample_type = ?raster.sample_type(),
            "Decoded source image"
        );
        Ok(Self::new(raster))
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }
}

impl ImageSource for InMemorySource {
    fn width(&self) -> u32 {
        self.raster.width()
    }

    fn height(&self) -> u32 {
        self.raster.height()
    }

    fn read_region(&self, region: Rect) -> Result<Raster, PyramidError> {
        check_region(region, self.bounds())?;
        self.raster.crop(region)
    }
}
