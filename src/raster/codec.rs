//! Tile encoding and image decoding.
//!
//! Formats are identified by their file extension (`png`, `jpg`, `tif`, ...)
//! and resolved to an `image` crate codec. Which formats can be written
//! depends on the codec features the crate is built with.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, ImageFormat, ImageReader};

use crate::error::PyramidError;

use super::{PixelLayout, Raster};

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// An encodable tile format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFormat {
    extension: String,
    format: ImageFormat,
    jpeg_quality: u8,
}

impl TileFormat {
    /// Resolve a format identifier such as `png` or `.JPG`.
    ///
    /// The identifier is kept (lowercased) as the tile file extension.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::UnsupportedFormat`] when no encoder exists for
    /// the identifier.
    pub fn parse(name: &str) -> Result<Self, PyramidError> {
        let extension = name.trim().trim_start_matches('.').to_ascii_lowercase();
        let format = ImageFormat::from_extension(&extension)
            .filter(|format| format.writing_enabled())
            .ok_or_else(|| PyramidError::UnsupportedFormat {
                format: name.to_string(),
            })?;

        Ok(Self {
            extension,
            format,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        })
    }

    /// Lossless PNG tiles.
    pub fn png() -> Self {
        Self {
            extension: "png".to_string(),
            format: ImageFormat::Png,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Set the quality used when the format is JPEG.
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = clamp_quality(quality);
        self
    }

    /// File extension of the tiles, as given to [`TileFormat::parse`].
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn image_format(&self) -> ImageFormat {
        self.format
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }
}

/// Encode a raster in the given format.
///
/// JPEG cannot carry alpha or 16-bit samples, so those rasters are reduced
/// to 8-bit gray or RGB first.
///
/// # Errors
///
/// Returns [`PyramidError::UnsupportedFormat`] if the codec cannot encode
/// this kind of raster, and [`PyramidError::Encode`] for any other codec
/// failure.
pub fn encode(raster: &Raster, format: &TileFormat) -> Result<Bytes, PyramidError> {
    let image = raster.to_dynamic()?;
    let map_err = |e: ImageError| match e {
        ImageError::Unsupported(_) => PyramidError::UnsupportedFormat {
            format: format.extension().to_string(),
        },
        other => PyramidError::Encode {
            message: other.to_string(),
        },
    };

    let mut output = Vec::new();
    if format.image_format() == ImageFormat::Jpeg {
        let mut encoder = JpegEncoder::new_with_quality(&mut output, format.jpeg_quality());
        match raster.layout() {
            PixelLayout::Gray | PixelLayout::GrayAlpha => encoder.encode_image(&image.to_luma8()),
            PixelLayout::Rgb | PixelLayout::Rgba => encoder.encode_image(&image.to_rgb8()),
        }
        .map_err(map_err)?;
    } else {
        image
            .write_to(&mut Cursor::new(&mut output), format.image_format())
            .map_err(map_err)?;
    }

    Ok(Bytes::from(output))
}

/// Decode encoded image bytes, guessing the format from their content.
pub fn decode(data: &[u8]) -> Result<Raster, PyramidError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PyramidError::Decode {
            message: e.to_string(),
        })?;

    let image = reader.decode().map_err(|e| PyramidError::Decode {
        message: e.to_string(),
    })?;
    Ok(Raster::from_dynamic(image))
}

/// Decode an image file.
pub fn decode_file(path: &Path) -> Result<Raster, PyramidError> {
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| PyramidError::Decode {
            message: format!("{}: {e}", path.display()),
        })?;

    let image = reader.decode().map_err(|e| PyramidError::Decode {
        message: format!("{}: {e}", path.display()),
    })?;
    Ok(Raster::from_dynamic(image))
}

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
