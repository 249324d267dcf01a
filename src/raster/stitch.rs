//! Assembly of up to four child tiles into one parent composite.

use crate::error::PyramidError;

use super::Raster;

/// Offsets of the right column and bottom row of children inside the
/// composite of one parent tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seams {
    pub right_x: u32,
    pub bottom_y: u32,
}

impl Seams {
    /// Seams of the parent at `(row, col)` in a grid of `tile_size` tiles
    /// overlapping by `overlap` pixels.
    ///
    /// The right child of parent column `col` is child column `2 * col + 1`,
    /// whose region starts `tile_size - overlap` pixels after the left
    /// child's, plus the left child's own leading overlap unless it sits in
    /// the first column. The same holds for rows.
    pub fn of_parent(tile_size: u32, overlap: u32, row: u32, col: u32) -> Self {
        let offset = |index: u32| {
            let leading = if index == 0 { 0 } else { overlap };
            tile_size - overlap + leading
        };
        Self {
            right_x: offset(col),
            bottom_y: offset(row),
        }
    }
}

/// Stitch the children of a tile into one raster.
///
/// The right column is pasted at `seams.right_x` and the bottom row at
/// `seams.bottom_y`, so the composite covers exactly the union of the child
/// regions. Missing children (at the right and bottom edges of a level)
/// contribute nothing. The result copies the layout and sample type of the
/// top-left child.
///
/// # Errors
///
/// Returns [`PyramidError::InvalidParameters`] if a child does not share
/// the top-left child's pixel representation.
pub fn stitch(
    top_left: Raster,
    top_right: Option<Raster>,
    bottom_left: Option<Raster>,
    bottom_right: Option<Raster>,
    seams: Seams,
) -> Result<Raster, PyramidError> {
    if top_right.is_none() && bottom_left.is_none() && bottom_right.is_none() {
        return Ok(top_left);
    }

    let Seams { right_x, bottom_y } = seams;
    let width = match &top_right {
        Some(tile) => right_x + tile.width(),
        None => top_left.width(),
    };
    let height = match &bottom_left {
        Some(tile) => bottom_y + tile.height(),
        None => top_left.height(),
    };

    let mut result = top_left.blank_like(width, height);
    result.paste(&top_left, 0, 0)?;
    if let Some(tile) = &top_right {
        result.paste(tile, i64::from(right_x), 0)?;
    }
    if let Some(tile) = &bottom_left {
        result.paste(tile, 0, i64::from(bottom_y))?;
    }
    if let Some(tile) = &bottom_right {
        result.paste(tile, i64::from(right_x), i64::from(bottom_y))?;
    }
    Ok(result)
}
