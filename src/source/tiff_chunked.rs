//! Chunked reads of TIFF files.
//!
//! A TIFF stores its pixels in strips or tiles ("chunks"). [`TiffSource`]
//! decodes only the chunks a requested region intersects, so tiling a
//! large TIFF never holds the whole image in memory.

use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, trace};

use super::{check_region, ImageSource};
use crate::error::PyramidError;
use crate::pyramid::Rect;
use crate::raster::{PixelLayout, Raster, SampleType, Samples};

/// `SampleFormat` tag values
const SAMPLE_FORMAT_UINT: u32 = 1;
const SAMPLE_FORMAT_IEEE_FLOAT: u32 = 3;

/// `PlanarConfiguration` tag value for interleaved samples
const PLANAR_CHUNKY: u32 = 1;

/// A TIFF file read chunk by chunk.
///
/// Each read opens its own decoder, so concurrent workers never contend
/// for a shared file handle.
#[derive(Debug, Clone)]
pub struct TiffSource {
    path: PathBuf,
    width: u32,
    height: u32,
    chunk_width: u32,
    chunk_height: u32,
    chunks_across: u32,
    layout: PixelLayout,
    sample_type: SampleType,
}

impl TiffSource {
    /// Read the header of a TIFF file.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::Decode`] if the file cannot be read, and
    /// [`PyramidError::UnsupportedFormat`] if its pixels are not 8-bit or
    /// 16-bit unsigned, or 32-bit float, interleaved gray or RGB samples.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PyramidError> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path)?;

        let (width, height) = decoder.dimensions().map_err(|e| decode_error(path, e))?;
        let color_type = decoder.colortype().map_err(|e| decode_error(path, e))?;
        let sample_format = decoder
            .get_tag_u32_vec(Tag::SampleFormat)
            .ok()
            .and_then(|formats| formats.first().copied())
            .unwrap_or(SAMPLE_FORMAT_UINT);
        let planar = decoder
            .get_tag_u32(Tag::PlanarConfiguration)
            .unwrap_or(PLANAR_CHUNKY);

        let Some((layout, sample_type)) = pixel_format(color_type, sample_format) else {
            return Err(PyramidError::UnsupportedFormat {
                format: format!("{color_type:?} TIFF with sample format {sample_format}"),
            });
        };
        if planar != PLANAR_CHUNKY {
            return Err(PyramidError::UnsupportedFormat {
                format: "planar TIFF".to_string(),
            });
        }

        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunk_width = chunk_width.max(1);
        let chunk_height = chunk_height.max(1);
        let chunks_across = width.div_ceil(chunk_width);

        debug!(
            path = %path.display(),
            width,
            height,
            chunk_width,
            chunk_height,
            layout = ?layout,
            sample_type = ?sample_type,
            "Opened chunked TIFF source"
        );

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            chunk_width,
            chunk_height,
            chunks_across,
            layout,
            sample_type,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Width and height of a full strip or tile.
    pub fn chunk_dimensions(&self) -> (u32, u32) {
        (self.chunk_width, self.chunk_height)
    }

    /// Chunk columns and rows intersecting `region`, as inclusive ranges.
    fn chunk_span(&self, region: Rect) -> ((u32, u32), (u32, u32)) {
        // The region is inside the image, so every coordinate is non-negative
        let first_col = region.x as u32 / self.chunk_width;
        let last_col = (region.right() - 1) as u32 / self.chunk_width;
        let first_row = region.y as u32 / self.chunk_height;
        let last_row = (region.bottom() - 1) as u32 / self.chunk_height;
        ((first_col, last_col), (first_row, last_row))
    }
}

impl ImageSource for TiffSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read_region(&self, region: Rect) -> Result<Raster, PyramidError> {
        check_region(region, self.bounds())?;

        let mut decoder = open_decoder(&self.path)?;
        let mut raster = Raster::blank(region.width, region.height, self.layout, self.sample_type);
        let ((first_col, last_col), (first_row, last_row)) = self.chunk_span(region);

        for chunk_row in first_row..=last_row {
            for chunk_col in first_col..=last_col {
                let index = chunk_row * self.chunks_across + chunk_col;
                let (width, height) = decoder.chunk_data_dimensions(index);
                let data = decoder
                    .read_chunk(index)
                    .map_err(|e| decode_error(&self.path, e))?;
                let samples = samples_of(data).ok_or_else(|| PyramidError::Decode {
                    message: format!("{}: unexpected sample type in chunk {index}", self.path.display()),
                })?;
                let chunk = Raster::new(width, height, self.layout, samples)?;

                let x = i64::from(chunk_col * self.chunk_width) - region.x;
                let y = i64::from(chunk_row * self.chunk_height) - region.y;
                raster.paste(&chunk, x, y)?;
            }
        }

        trace!(
            path = %self.path.display(),
            %region,
            chunks = (last_col - first_col + 1) * (last_row - first_row + 1),
            "Read TIFF region"
        );
        Ok(raster)
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, PyramidError> {
    let file = File::open(path).map_err(|e| decode_error(path, e))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| decode_error(path, e))?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

fn decode_error(path: &Path, error: impl Display) -> PyramidError {
    PyramidError::Decode {
        message: format!("{}: {error}", path.display()),
    }
}

fn pixel_format(color_type: ColorType, sample_format: u32) -> Option<(PixelLayout, SampleType)> {
    let (layout, bits) = match color_type {
        ColorType::Gray(bits) => (PixelLayout::Gray, bits),
        ColorType::GrayA(bits) => (PixelLayout::GrayAlpha, bits),
        ColorType::RGB(bits) => (PixelLayout::Rgb, bits),
        ColorType::RGBA(bits) => (PixelLayout::Rgba, bits),
        _ => return None,
    };
    let sample_type = match (sample_format, bits) {
        (SAMPLE_FORMAT_UINT, 8) => SampleType::U8,
        (SAMPLE_FORMAT_UINT, 16) => SampleType::U16,
        (SAMPLE_FORMAT_IEEE_FLOAT, 32) => SampleType::F32,
        _ => return None,
    };
    Some((layout, sample_type))
}

fn samples_of(data: DecodingResult) -> Option<Samples> {
    match data {
        DecodingResult::U8(values) => Some(Samples::U8(values)),
        DecodingResult::U16(values) => Some(Samples::U16(values)),
        DecodingResult::F32(values) => Some(Samples::F32(values)),
        _ => None,
    }
}
