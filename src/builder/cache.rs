use tracing::debug;

use crate::error::PyramidError;
use crate::pyramid::Rect;
use crate::raster::Raster;
use crate::source::ImageSource;

/// Source pixels of one subtree, read in a single request.
///
/// Created by the subtree's root tile and borrowed by its descendants, which
/// then never touch the source. Dropped once the root tile is written.
#[derive(Debug)]
pub struct SourceCache {
    region: Rect,
    raster: Raster,
}

impl SourceCache {
    /// Read `region` of the source into memory.
    pub fn fill(source: &dyn ImageSource, region: Rect) -> Result<Self, PyramidError> {
        let raster = source.read_region(region)?;
        debug!(%region, "Cached subtree source region");
        Ok(Self { region, raster })
    }

    /// Region of the source held by the cache.
    pub fn region(&self) -> Rect {
        self.region
    }

    /// Read a part of the cached region, in source coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::OutsideCache`] if `region` is not entirely
    /// cached.
    pub fn read_region(&self, region: Rect) -> Result<Raster, PyramidError> {
        if !self.region.contains(&region) {
            return Err(PyramidError::OutsideCache {
                region,
                cached: self.region,
            });
        }
        self.raster
            .crop(region.translate(-self.region.x, -self.region.y))
    }
}
