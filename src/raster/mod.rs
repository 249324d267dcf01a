//! In-memory pixel buffers.
//!
//! A [`Raster`] stores interleaved, row-major samples in one of three
//! representations. 8-bit rasters are what ordinary PNG/JPEG sources decode
//! to; 16-bit and 32-bit float rasters come from scientific TIFFs and go
//! through a dedicated resampling path.

pub mod codec;
pub mod resize;
pub mod stitch;

use image::{DynamicImage, ImageBuffer};

use crate::error::PyramidError;
use crate::pyramid::Rect;

pub use codec::{decode, encode, TileFormat};
pub use resize::resize;
pub use stitch::{stitch, Seams};

/// Channel arrangement of a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl PixelLayout {
    /// Number of samples per pixel.
    pub const fn channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::GrayAlpha => 2,
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }
}

/// Representation of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    F32,
}

/// Sample storage, tagged by representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl Samples {
    /// Zero-filled storage of `len` samples.
    pub fn zeroed(sample_type: SampleType, len: usize) -> Self {
        match sample_type {
            SampleType::U8 => Samples::U8(vec![0; len]),
            SampleType::U16 => Samples::U16(vec![0; len]),
            SampleType::F32 => Samples::F32(vec![0.0; len]),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            Samples::U8(_) => SampleType::U8,
            Samples::U16(_) => SampleType::U16,
            Samples::F32(_) => SampleType::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
            Samples::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded image or tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    layout: PixelLayout,
    samples: Samples,
}

impl Raster {
    /// Wrap existing samples.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::InvalidParameters`] when the number of samples
    /// does not match `width * height * channels`.
    pub fn new(width: u32, height: u32, layout: PixelLayout, samples: Samples) -> Result<Self, PyramidError> {
        let expected = width as usize * height as usize * layout.channels();
        if samples.len() != expected {
            return Err(PyramidError::InvalidParameters(format!(
                "{width}x{height} {layout:?} raster needs {expected} samples, got {}",
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            samples,
        })
    }

    /// Zero-filled raster.
    pub fn blank(width: u32, height: u32, layout: PixelLayout, sample_type: SampleType) -> Self {
        let len = width as usize * height as usize * layout.channels();
        Self {
            width,
            height,
            layout,
            samples: Samples::zeroed(sample_type, len),
        }
    }

    /// Zero-filled raster with the layout and sample type of `self`.
    pub fn blank_like(&self, width: u32, height: u32) -> Self {
        Self::blank(width, height, self.layout, self.sample_type())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn sample_type(&self) -> SampleType {
        self.samples.sample_type()
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn into_samples(self) -> Samples {
        self.samples
    }

    /// Rectangle covering the whole raster.
    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    /// Value of channel `channel` at `(x, y)`, widened to `f64`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the raster.
    pub fn sample(&self, x: u32, y: u32, channel: usize) -> f64 {
        let index = self.index(x, y) + channel;
        match &self.samples {
            Samples::U8(v) => f64::from(v[index]),
            Samples::U16(v) => f64::from(v[index]),
            Samples::F32(v) => f64::from(v[index]),
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.layout.channels()
    }

    /// Copy the pixels of `region` into a new raster.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::EmptyRegion`] for an empty region and
    /// [`PyramidError::RegionOutOfBounds`] if it does not fit in the raster.
    pub fn crop(&self, region: Rect) -> Result<Raster, PyramidError> {
        if region.is_empty() {
            return Err(PyramidError::EmptyRegion);
        }
        if !self.bounds().contains(&region) {
            return Err(PyramidError::RegionOutOfBounds {
                region,
                bounds: self.bounds(),
            });
        }
        if region == self.bounds() {
            return Ok(self.clone());
        }

        let mut out = self.blank_like(region.width, region.height);
        out.paste(self, -region.x, -region.y)?;
        Ok(out)
    }

    /// Copy `src` into this raster with its top-left corner at `(x, y)`.
    ///
    /// Pixels falling outside this raster are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::InvalidParameters`] if `src` has a different
    /// layout or sample type.
    pub fn paste(&mut self, src: &Raster, x: i64, y: i64) -> Result<(), PyramidError> {
        if src.layout != self.layout || src.sample_type() != self.sample_type() {
            return Err(PyramidError::InvalidParameters(format!(
                "cannot paste {:?}/{:?} raster into {:?}/{:?} raster",
                src.layout,
                src.sample_type(),
                self.layout,
                self.sample_type()
            )));
        }

        let target = Rect::new(x, y, src.width, src.height).intersection(&self.bounds());
        if target.is_empty() {
            return Ok(());
        }

        let block = Block {
            src_width: src.width as usize,
            src_x: (target.x - x) as usize,
            src_y: (target.y - y) as usize,
            dst_width: self.width as usize,
            dst_x: target.x as usize,
            dst_y: target.y as usize,
            width: target.width as usize,
            height: target.height as usize,
            channels: self.layout.channels(),
        };
        match (&mut self.samples, &src.samples) {
            (Samples::U8(dst), Samples::U8(s)) => block.copy(s, dst),
            (Samples::U16(dst), Samples::U16(s)) => block.copy(s, dst),
            (Samples::F32(dst), Samples::F32(s)) => block.copy(s, dst),
            _ => unreachable!("sample types checked above"),
        }
        Ok(())
    }

    /// Convert a decoded image without copying its samples.
    ///
    /// Pixel types this crate does not model are converted to 8-bit RGBA.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (layout, samples) = match image {
            DynamicImage::ImageLuma8(b) => (PixelLayout::Gray, Samples::U8(b.into_raw())),
            DynamicImage::ImageLumaA8(b) => (PixelLayout::GrayAlpha, Samples::U8(b.into_raw())),
            DynamicImage::ImageRgb8(b) => (PixelLayout::Rgb, Samples::U8(b.into_raw())),
            DynamicImage::ImageRgba8(b) => (PixelLayout::Rgba, Samples::U8(b.into_raw())),
            DynamicImage::ImageLuma16(b) => (PixelLayout::Gray, Samples::U16(b.into_raw())),
            DynamicImage::ImageLumaA16(b) => (PixelLayout::GrayAlpha, Samples::U16(b.into_raw())),
            DynamicImage::ImageRgb16(b) => (PixelLayout::Rgb, Samples::U16(b.into_raw())),
            DynamicImage::ImageRgba16(b) => (PixelLayout::Rgba, Samples::U16(b.into_raw())),
            DynamicImage::ImageRgb32F(b) => (PixelLayout::Rgb, Samples::F32(b.into_raw())),
            DynamicImage::ImageRgba32F(b) => (PixelLayout::Rgba, Samples::F32(b.into_raw())),
            other => (PixelLayout::Rgba, Samples::U8(other.into_rgba8().into_raw())),
        };
        Self {
            width,
            height,
            layout,
            samples,
        }
    }

    /// Convert into an `image` buffer without copying the samples.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::UnsupportedFormat`] for grayscale float
    /// rasters, which the `image` crate cannot represent.
    pub fn into_dynamic(self) -> Result<DynamicImage, PyramidError> {
        let Raster {
            width,
            height,
            layout,
            samples,
        } = self;

        let image = match (layout, samples) {
            (PixelLayout::Gray, Samples::U8(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageLuma8)
            }
            (PixelLayout::GrayAlpha, Samples::U8(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageLumaA8)
            }
            (PixelLayout::Rgb, Samples::U8(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageRgb8)
            }
            (PixelLayout::Rgba, Samples::U8(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageRgba8)
            }
            (PixelLayout::Gray, Samples::U16(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageLuma16)
            }
            (PixelLayout::GrayAlpha, Samples::U16(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageLumaA16)
            }
            (PixelLayout::Rgb, Samples::U16(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageRgb16)
            }
            (PixelLayout::Rgba, Samples::U16(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageRgba16)
            }
            (PixelLayout::Rgb, Samples::F32(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageRgb32F)
            }
            (PixelLayout::Rgba, Samples::F32(d)) => {
                ImageBuffer::from_raw(width, height, d).map(DynamicImage::ImageRgba32F)
            }
            (PixelLayout::Gray | PixelLayout::GrayAlpha, Samples::F32(_)) => {
                return Err(PyramidError::UnsupportedFormat {
                    format: "32-bit float grayscale".to_string(),
                })
            }
        };

        image.ok_or_else(|| PyramidError::Encode {
            message: format!("sample buffer does not match {width}x{height} {layout:?}"),
        })
    }

    /// Borrowing variant of [`Raster::into_dynamic`].
    pub fn to_dynamic(&self) -> Result<DynamicImage, PyramidError> {
        self.clone().into_dynamic()
    }
}

/// Geometry of a rectangular copy between two interleaved buffers.
struct Block {
    src_width: usize,
    src_x: usize,
    src_y: usize,
    dst_width: usize,
    dst_x: usize,
    dst_y: usize,
    width: usize,
    height: usize,
    channels: usize,
}

impl Block {
    fn copy<T: Copy>(&self, src: &[T], dst: &mut [T]) {
        let row_len = self.width * self.channels;
        for row in 0..self.height {
            let s = ((self.src_y + row) * self.src_width + self.src_x) * self.channels;
            let d = ((self.dst_y + row) * self.dst_width + self.dst_x) * self.channels;
            dst[d..d + row_len].copy_from_slice(&src[s..s + row_len]);
        }
    }
}
