//! Pyramid addressing and descriptor.
//!
//! Deep Zoom numbers levels from the coarsest (level 0, roughly 1x1 pixel) up
//! to the full resolution image (level `max_level`). Every tile of every level
//! lives under a `<name>_files/<level>/` directory next to the descriptor:
//!
//! ```text
//! <name>.dzi
//! <name>_files/
//! ├── 0/0_0.png
//! ├── 1/0_0.png
//! │   ...
//! └── 9/<col>_<row>.png
//! ```
//!
//! The geometry in this module is shared by the builder and the reader. Any
//! divergence between the two would make pyramids unreadable.

mod descriptor;
mod geometry;

use std::fmt;

pub use descriptor::{DziFile, DZI_NAMESPACE};
pub use geometry::{axis_spans, level_count, AxisSpan, PyramidGeometry};

/// A rectangle of pixels.
///
/// The origin is signed so that read requests may start above or to the left
/// of an image; pyramid addressing only ever produces non-negative origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin.
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge.
    pub const fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    /// Exclusive bottom edge.
    pub const fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Area shared by both rectangles. Empty (zero width or height) when they
    /// do not overlap.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return Rect::new(x, y, 0, 0);
        }
        Rect::new(x, y, (right - x) as u32, (bottom - y) as u32)
    }

    /// Whether `other` is non-empty and lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        !other.is_empty()
            && other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Same rectangle shifted by `(dx, dy)`.
    pub const fn translate(&self, dx: i64, dy: i64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[x={}, y={}, width={}, height={}]",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Name of the directory holding the tiles of `base_name`.
pub fn files_dir(base_name: &str) -> String {
    format!("{base_name}_files")
}

/// Relative path of a tile: `<base>_files/<level>/<col>_<row>.<format>`.
pub fn tile_path(base_name: &str, level: u32, col: u32, row: u32, format: &str) -> String {
    format!("{}/{level}/{col}_{row}.{format}", files_dir(base_name))
}

/// Relative path of the descriptor: `<base>.<ext>`.
pub fn descriptor_path(base_name: &str, descriptor_ext: &str) -> String {
    format!("{base_name}.{descriptor_ext}")
}

/// Strip the directory part and the last extension from a name.
///
/// `"slides/scan.tiff"` becomes `"scan"`; a name without extension is
/// returned as-is.
pub fn base_name(name: &str) -> &str {
    let file = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(name);
    match file.rfind('.') {
        Some(0) | None => file,
        Some(dot) => &file[..dot],
    }
}
