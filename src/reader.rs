//! Reading regions back out of a Deep Zoom pyramid.
//!
//! A request for a rectangle of the original image at some zoom is served
//! from the coarsest level that still has at least the requested
//! resolution. The covering tiles are trimmed, assembled and resampled to
//! the exact output size.

use std::path::Path;

use tracing::debug;

use crate::error::{DescriptorError, PyramidError};
use crate::pyramid::{axis_spans, base_name, tile_path, DziFile, PyramidGeometry, Rect};
use crate::raster::{codec, resize, Raster};
use crate::source::{check_region, ImageSource};
use crate::storage::{DirectoryStorage, EntrySource};

/// Reader over a persisted pyramid.
pub struct DeepZoomReader {
    entries: Box<dyn EntrySource>,
    descriptor: DziFile,
    geometry: PyramidGeometry,
    /// Descriptor path without extension; tiles live in `<tile_base>_files`
    tile_base: String,
}

impl std::fmt::Debug for DeepZoomReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepZoomReader")
            .field("descriptor", &self.descriptor)
            .field("tile_base", &self.tile_base)
            .finish_non_exhaustive()
    }
}

impl DeepZoomReader {
    /// Open the pyramid described by a `.dzi` file on the local filesystem.
    pub fn open(dzi_path: impl AsRef<Path>) -> Result<Self, PyramidError> {
        let path = dzi_path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                PyramidError::InvalidParameters(format!("invalid descriptor path {}", path.display()))
            })?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let storage = DirectoryStorage::open(dir)?;
        Self::from_source(Box::new(storage), file_name)
    }

    /// Open a pyramid stored in any entry source.
    ///
    /// Tiles are looked up in the `<name>_files` directory next to the
    /// descriptor.
    pub fn from_source(entries: Box<dyn EntrySource>, descriptor_path: &str) -> Result<Self, PyramidError> {
        let bytes = entries.read_entry(descriptor_path)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| DescriptorError::Parse(format!("descriptor is not UTF-8: {e}")))?;
        let descriptor = DziFile::parse(text)?;
        let geometry = descriptor.geometry()?;

        let tile_base = match descriptor_path.rsplit_once('/') {
            Some((dir, file)) => format!("{dir}/{}", base_name(file)),
            None => base_name(descriptor_path).to_string(),
        };
        debug!(
            descriptor = descriptor_path,
            width = descriptor.width,
            height = descriptor.height,
            max_level = geometry.max_level(),
            "Opened pyramid"
        );

        Ok(Self {
            entries,
            descriptor,
            geometry,
            tile_base,
        })
    }

    pub fn descriptor(&self) -> &DziFile {
        &self.descriptor
    }

    pub fn geometry(&self) -> &PyramidGeometry {
        &self.geometry
    }

    /// Full resolution level.
    pub fn max_level(&self) -> u32 {
        self.geometry.max_level()
    }

    /// Coarsest level whose resolution is at least `zoom`.
    ///
    /// Zooms above 1 map to the full resolution level.
    pub fn closest_level(&self, zoom: f64) -> u32 {
        let max_level = i64::from(self.max_level());
        let level = max_level + zoom.log2().ceil() as i64;
        level.clamp(0, max_level) as u32
    }

    /// Zoom factor of a level relative to the original image.
    pub fn zoom_of_level(&self, level: u32) -> f64 {
        2f64.powi(level as i32 - self.max_level() as i32)
    }

    /// Read the whole image at `zoom`.
    pub fn read_whole_image(&self, zoom: f64) -> Result<Raster, PyramidError> {
        self.read_region(self.bounds(), zoom)
    }

    /// Read a rectangle of the original image at `zoom`.
    ///
    /// The result measures `round(width * zoom)` by `round(height * zoom)`.
    /// Parts of the rectangle outside the image are left blank.
    ///
    /// # Errors
    ///
    /// - [`PyramidError::EmptyRegion`] for an empty rectangle
    /// - [`PyramidError::ZoomTooSmall`] if the output would be empty
    /// - [`PyramidError::RegionOutOfBounds`] if the rectangle misses the image
    pub fn read_region(&self, region: Rect, zoom: f64) -> Result<Raster, PyramidError> {
        if region.is_empty() {
            return Err(PyramidError::EmptyRegion);
        }
        let (width, height) = output_size(region, zoom)?;

        let bounds = self.bounds();
        let inside = region.intersection(&bounds);
        if inside == region {
            return self.read_sub_image(region, zoom);
        }
        if inside.is_empty() {
            return Err(PyramidError::RegionOutOfBounds { region, bounds });
        }

        let sub_image = self.read_sub_image(inside, zoom)?;
        let mut result = sub_image.blank_like(width, height);
        let dx = if region.x < 0 {
            (-region.x as f64 * zoom).round() as i64
        } else {
            0
        };
        let dy = if region.y < 0 {
            (-region.y as f64 * zoom).round() as i64
        } else {
            0
        };
        result.paste(&sub_image, dx, dy)?;
        Ok(result)
    }

    /// Read a rectangle lying inside the image.
    fn read_sub_image(&self, region: Rect, zoom: f64) -> Result<Raster, PyramidError> {
        let (width, height) = output_size(region, zoom)?;
        let level = self.closest_level(zoom);
        let level_zoom = self.zoom_of_level(level);
        let (level_width, level_height) = self.geometry.level_dimensions(level);

        let x = ((region.x as f64 * level_zoom).round() as i64).clamp(0, i64::from(level_width) - 1);
        let y = ((region.y as f64 * level_zoom).round() as i64).clamp(0, i64::from(level_height) - 1);
        let w = ((f64::from(region.width) * level_zoom).round() as i64).clamp(1, i64::from(level_width) - x);
        let h = ((f64::from(region.height) * level_zoom).round() as i64).clamp(1, i64::from(level_height) - y);

        let image = self.read_region_of_level(Rect::new(x, y, w as u32, h as u32), level)?;
        resize(image, width, height)
    }

    /// Read a rectangle of one level, in that level's pixel coordinates.
    pub fn read_region_of_level(&self, region: Rect, level: u32) -> Result<Raster, PyramidError> {
        if level > self.max_level() {
            return Err(PyramidError::InvalidParameters(format!(
                "level {level} above maximum level {}",
                self.max_level()
            )));
        }
        let (level_width, level_height) = self.geometry.level_dimensions(level);
        check_region(region, Rect::from_size(level_width, level_height))?;

        let tile_size = self.geometry.tile_size();
        let overlap = self.geometry.overlap();
        let columns = axis_spans(region.x, region.width, tile_size, overlap);
        let rows = axis_spans(region.y, region.height, tile_size, overlap);

        let mut result: Option<Raster> = None;
        for column in &columns {
            for row in &rows {
                let tile = self.read_tile(level, column.tile, row.tile)?;
                let part = tile.crop(Rect::new(
                    i64::from(column.offset_in_tile),
                    i64::from(row.offset_in_tile),
                    column.length,
                    row.length,
                ))?;

                let target = result.get_or_insert_with(|| part.blank_like(region.width, region.height));
                target.paste(
                    &part,
                    i64::from(column.offset_in_region),
                    i64::from(row.offset_in_region),
                )?;
            }
        }

        result.ok_or(PyramidError::EmptyRegion)
    }

    fn read_tile(&self, level: u32, column: u32, row: u32) -> Result<Raster, PyramidError> {
        let path = tile_path(&self.tile_base, level, column, row, &self.descriptor.format);
        let bytes = self.entries.read_entry(&path)?;
        codec::decode(&bytes)
    }
}

/// Output size of a read, rejecting zooms that round it to nothing.
fn output_size(region: Rect, zoom: f64) -> Result<(u32, u32), PyramidError> {
    if !(zoom.is_finite() && zoom > 0.0) {
        return Err(PyramidError::InvalidParameters(format!(
            "zoom must be a positive number, got {zoom}"
        )));
    }
    let width = (f64::from(region.width) * zoom).round();
    let height = (f64::from(region.height) * zoom).round();
    if width < 1.0 || height < 1.0 {
        return Err(PyramidError::ZoomTooSmall { zoom });
    }
    Ok((width as u32, height as u32))
}

/// A pyramid used as a source reads at zoom 1.
impl ImageSource for DeepZoomReader {
    fn width(&self) -> u32 {
        self.descriptor.width
    }

    fn height(&self) -> u32 {
        self.descriptor.height
    }

    fn read_region(&self, region: Rect) -> Result<Raster, PyramidError> {
        check_region(region, self.bounds())?;
        self.read_sub_image(region, 1.0)
    }
}
