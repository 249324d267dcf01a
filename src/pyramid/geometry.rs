//! Level and tile geometry of a Deep Zoom pyramid.
//!
//! All functions here are pure. For a pyramid of `max_level` levels:
//! - scale factor of level L = 2^(max_level - L)
//! - level width = ceil(original_width / scale), same for height
//! - tile grid = ceil(level_width / tile_size) x ceil(level_height / tile_size)
//!
//! A tile owns `tile_size` pixels per axis plus `overlap` pixels on each side
//! that touches another tile. The first row/column only has trailing overlap,
//! and the last one is clipped at the level edge.

use crate::error::PyramidError;

use super::Rect;

/// Number of the full resolution level: `ceil(log2(max(width, height)))`.
///
/// A 1x1 image has a single level, numbered 0.
pub fn level_count(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim <= 1 {
        return 0;
    }
    u32::BITS - (max_dim - 1).leading_zeros()
}

/// Tiling parameters and original dimensions of one pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidGeometry {
    tile_size: u32,
    overlap: u32,
    width: u32,
    height: u32,
    max_level: u32,
}

impl PyramidGeometry {
    /// Create the geometry of a pyramid.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::InvalidParameters`] if the tile size is zero,
    /// the overlap is not smaller than the tile size, or the image is empty.
    pub fn new(tile_size: u32, overlap: u32, width: u32, height: u32) -> Result<Self, PyramidError> {
        if tile_size == 0 {
            return Err(PyramidError::InvalidParameters(
                "tile size must be greater than 0".to_string(),
            ));
        }
        if overlap >= tile_size {
            return Err(PyramidError::InvalidParameters(format!(
                "overlap ({overlap}) must be smaller than tile size ({tile_size})"
            )));
        }
        if width == 0 || height == 0 {
            return Err(PyramidError::InvalidParameters(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }

        Ok(Self {
            tile_size,
            overlap,
            width,
            height,
            max_level: level_count(width, height),
        })
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    /// Width of the original image.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of the original image.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Level holding the full resolution image.
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Downsample factor of a level relative to the original image.
    ///
    /// Levels above `max_level` are treated as `max_level`.
    pub fn scale_factor(&self, level: u32) -> u64 {
        1u64 << self.max_level.saturating_sub(level)
    }

    /// Pixel dimensions of a level.
    pub fn level_dimensions(&self, level: u32) -> (u32, u32) {
        let factor = self.scale_factor(level);
        (
            u64::from(self.width).div_ceil(factor) as u32,
            u64::from(self.height).div_ceil(factor) as u32,
        )
    }

    /// Number of tile columns and rows of a level.
    pub fn grid_size(&self, level: u32) -> (u32, u32) {
        let (width, height) = self.level_dimensions(level);
        (width.div_ceil(self.tile_size), height.div_ceil(self.tile_size))
    }

    /// Whether `(level, row, col)` addresses an existing tile.
    pub fn contains_tile(&self, level: u32, row: u32, col: u32) -> bool {
        if level > self.max_level {
            return false;
        }
        let (cols, rows) = self.grid_size(level);
        col < cols && row < rows
    }

    /// Rectangle owned by a tile, in the pixel coordinates of its level.
    ///
    /// Returns `None` for addresses outside the tile grid.
    pub fn tile_region(&self, level: u32, row: u32, col: u32) -> Option<Rect> {
        if !self.contains_tile(level, row, col) {
            return None;
        }
        let (level_width, level_height) = self.level_dimensions(level);
        let (x, width) = self.axis_extent(col, level_width);
        let (y, height) = self.axis_extent(row, level_height);
        Some(Rect::new(x, y, width, height))
    }

    /// Width and height of a tile, `(0, 0)` outside the tile grid.
    pub fn tile_dimensions(&self, level: u32, row: u32, col: u32) -> (u32, u32) {
        self.tile_region(level, row, col)
            .map_or((0, 0), |r| (r.width, r.height))
    }

    /// Rectangle of the original image covered by a tile.
    ///
    /// This is the level rectangle scaled by the level's factor and clipped
    /// to the original image. It contains every full resolution tile of the
    /// tile's subtree, overlaps included.
    pub fn tile_region_in_source(&self, level: u32, row: u32, col: u32) -> Option<Rect> {
        let region = self.tile_region(level, row, col)?;
        let factor = self.scale_factor(level) as i64;

        let x = region.x * factor;
        let y = region.y * factor;
        let width = (i64::from(region.width) * factor).min(i64::from(self.width) - x);
        let height = (i64::from(region.height) * factor).min(i64::from(self.height) - y);
        Some(Rect::new(x, y, width as u32, height as u32))
    }

    fn axis_extent(&self, index: u32, level_extent: u32) -> (i64, u32) {
        let tile_size = i64::from(self.tile_size);
        let overlap = i64::from(self.overlap);
        let index = i64::from(index);

        let (start, nominal) = if index == 0 {
            (0, tile_size + overlap)
        } else {
            (index * tile_size - overlap, tile_size + 2 * overlap)
        };
        let length = nominal.min(i64::from(level_extent) - start);
        (start, length as u32)
    }
}

/// One tile's contribution to a read along a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSpan {
    /// Column or row index of the tile
    pub tile: u32,
    /// First pixel to take inside the tile
    pub offset_in_tile: u32,
    /// Number of pixels taken from the tile
    pub length: u32,
    /// Where those pixels land in the requested region
    pub offset_in_region: u32,
}

/// Split `[start, start + length)` of one level axis into per-tile spans.
///
/// Pixels shared by two tiles are taken from the tile in which they are not
/// part of the overlap, so that every span comes from a tile's own area
/// whenever possible. The spans are contiguous and their lengths add up to
/// `length`. `start` must be non-negative and the range must lie inside the
/// level.
pub fn axis_spans(start: i64, length: u32, tile_size: u32, overlap: u32) -> Vec<AxisSpan> {
    if length == 0 {
        return Vec::new();
    }
    let tile_size = i64::from(tile_size);
    let overlap = i64::from(overlap);
    let length = i64::from(length);
    let end = start + length;

    let mut first = start / tile_size;
    if tile_size * (first + 1) - overlap <= start {
        first += 1;
    }
    let mut last = end / tile_size;
    if tile_size * last + overlap >= end && last != 0 {
        last -= 1;
    }
    // A range lying entirely in an overlap band belongs to both neighbours.
    if first > last {
        first = last;
    }

    let mut spans = Vec::with_capacity((last - first + 1) as usize);
    let mut done = 0i64;
    for index in first..=last {
        let (offset, taken) = if index == first {
            let mut offset = start - first * tile_size;
            let taken = if index == last {
                length
            } else {
                tile_size - offset
            };
            if first != 0 {
                offset += overlap;
            }
            (offset, taken)
        } else {
            let taken = if index == last {
                length - done
            } else {
                tile_size
            };
            (overlap, taken)
        };

        spans.push(AxisSpan {
            tile: index as u32,
            offset_in_tile: offset as u32,
            length: taken as u32,
            offset_in_region: done as u32,
        });
        done += taken;
    }
    spans
}
