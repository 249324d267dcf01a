//! Pyramid construction.
//!
//! The builder walks the tile tree from the single level 0 tile down to the
//! full resolution level. Every tile is produced by stitching and
//! downsampling its four children, so the source image is only read at the
//! full resolution level, and each of its tiles exactly once.
//!
//! # Parallelism
//!
//! With more than one worker the recursion runs on a dedicated `rayon` pool
//! and the four children of a tile are computed with nested
//! [`rayon::join`] calls. Output does not depend on the number of workers.
//!
//! # Source cache
//!
//! A cache fraction `f` in `(0, 1)` selects the coarsest level whose tiles
//! cover at most `sqrt(f * area)` source pixels per side. Each tile of that
//! level reads its whole source footprint in one request, and its subtree is
//! then computed sequentially from memory. At most one such cache is alive
//! per worker, so the memory held by caches is bounded by
//! `parallelism * f * area` pixels.

mod cache;
mod task;

use std::io::Write;
use std::thread;
use std::time::Instant;

use tracing::info;

use crate::error::{PyramidError, StorageError};
use crate::pyramid::{base_name, descriptor_path, DziFile, PyramidGeometry};
use crate::raster::TileFormat;
use crate::source::ImageSource;
use crate::storage::StorageSink;

pub use cache::SourceCache;
use task::TileTask;

/// Default tile size, which with an overlap of 1 gives 256 pixel tiles.
pub const DEFAULT_TILE_SIZE: u32 = 254;

/// Default overlap between adjacent tiles.
pub const DEFAULT_OVERLAP: u32 = 1;

/// Default extension of the descriptor file.
pub const DEFAULT_DESCRIPTOR_EXT: &str = "dzi";

// =============================================================================
// Options and Summary
// =============================================================================

/// Runtime options of a build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Number of worker threads; 0 or 1 builds sequentially
    pub parallelism: usize,

    /// Largest share of the source image held in one subtree cache
    /// (0 disables caching, 1 caches the whole image)
    pub cache_fraction: f32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            parallelism: thread::available_parallelism().map_or(1, |n| n.get()),
            cache_fraction: 0.0,
        }
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    /// Full resolution level
    pub max_level: u32,
    /// Number of tile entries written
    pub tiles_written: usize,
    /// Level at which subtrees cache their source footprint
    /// (`max_level` when caching is off)
    pub cache_level: u32,
}

// =============================================================================
// Builder
// =============================================================================

/// Writes Deep Zoom pyramids.
#[derive(Debug, Clone)]
pub struct PyramidBuilder {
    tile_size: u32,
    overlap: u32,
    tile_format: TileFormat,
    descriptor_ext: String,
}

impl Default for PyramidBuilder {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            overlap: DEFAULT_OVERLAP,
            tile_format: TileFormat::png(),
            descriptor_ext: DEFAULT_DESCRIPTOR_EXT.to_string(),
        }
    }
}

impl PyramidBuilder {
    /// Create a builder.
    ///
    /// # Errors
    ///
    /// Returns [`PyramidError::InvalidParameters`] for a zero tile size, an
    /// overlap not smaller than the tile size or an empty descriptor
    /// extension, and [`PyramidError::UnsupportedFormat`] if tiles cannot be
    /// encoded in `tile_format`.
    pub fn new(
        tile_size: u32,
        overlap: u32,
        tile_format: &str,
        descriptor_ext: &str,
    ) -> Result<Self, PyramidError> {
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
        let descriptor_ext = descriptor_ext.trim_start_matches('.');
        if descriptor_ext.is_empty() {
            return Err(PyramidError::InvalidParameters(
                "descriptor extension cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            tile_size,
            overlap,
            tile_format: TileFormat::parse(tile_format)?,
            descriptor_ext: descriptor_ext.to_string(),
        })
    }

    /// Replace the tile format, e.g. to change the JPEG quality.
    pub fn with_tile_format(mut self, tile_format: TileFormat) -> Self {
        self.tile_format = tile_format;
        self
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    pub fn tile_format(&self) -> &TileFormat {
        &self.tile_format
    }

    pub fn descriptor_ext(&self) -> &str {
        &self.descriptor_ext
    }

    /// Build the pyramid of `source` into `sink`.
    ///
    /// `name` gives the base name of the descriptor and of the `_files`
    /// directory; any directory part and extension are stripped. The
    /// descriptor is written first, then every tile of every level.
    ///
    /// The sink is left open.
    pub fn build<S: StorageSink>(
        &self,
        source: &dyn ImageSource,
        name: &str,
        sink: &S,
        options: &BuildOptions,
    ) -> Result<BuildSummary, PyramidError> {
        let start = Instant::now();
        let geometry =
            PyramidGeometry::new(self.tile_size, self.overlap, source.width(), source.height())?;
        let base = base_name(name);
        if base.is_empty() {
            return Err(PyramidError::InvalidParameters(format!(
                "cannot derive a pyramid name from {name:?}"
            )));
        }

        let cache_level = cache_level(&geometry, options.cache_fraction);
        let use_cache = cache_level < geometry.max_level();
        let parallelism = options.parallelism.max(1);

        info!(
            pyramid = base,
            width = geometry.width(),
            height = geometry.height(),
            max_level = geometry.max_level(),
            tile_size = self.tile_size,
            overlap = self.overlap,
            tile_format = self.tile_format.extension(),
            parallelism,
            cache_level = ?use_cache.then_some(cache_level),
            "Building pyramid"
        );

        self.write_descriptor(&geometry, base, sink)?;

        let mut task = TileTask::new(geometry, source, sink, &self.tile_format, base);
        task.fork = parallelism > 1;
        task.cache_level = use_cache.then_some(cache_level);

        if task.fork {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(parallelism)
                .thread_name(|i| format!("dzi-tile-{i}"))
                .build()
                .map_err(|e| PyramidError::ThreadPool(e.to_string()))?;
            pool.install(|| task.compute(0, 0, 0, None))?;
        } else {
            task.compute(0, 0, 0, None)?;
        }

        let summary = BuildSummary {
            max_level: geometry.max_level(),
            tiles_written: task.tiles_written(),
            cache_level,
        };
        info!(
            pyramid = base,
            tiles = summary.tiles_written,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pyramid built"
        );
        Ok(summary)
    }

    fn write_descriptor<S: StorageSink>(
        &self,
        geometry: &PyramidGeometry,
        base: &str,
        sink: &S,
    ) -> Result<(), PyramidError> {
        let dzi = DziFile::new(
            self.tile_size,
            self.overlap,
            self.tile_format.extension(),
            geometry.width(),
            geometry.height(),
        );
        let path = descriptor_path(base, &self.descriptor_ext);
        sink.append_entry(&path, |writer: &mut dyn Write| {
            writer
                .write_all(dzi.to_xml().as_bytes())
                .map_err(|e| StorageError::io(&path, e))
        })?;
        Ok(())
    }
}

/// Level at which subtree roots cache their source footprint.
///
/// A fraction of 1 or more caches the whole image at level 0; 0 or less
/// (or NaN) disables caching and returns `max_level`. In between, this is
/// the coarsest level whose first tile covers at most
/// `floor(sqrt(area * fraction))` source pixels in each dimension.
pub fn cache_level(geometry: &PyramidGeometry, fraction: f32) -> u32 {
    let max_level = geometry.max_level();
    if fraction >= 1.0 {
        return 0;
    }
    if !(fraction > 0.0) {
        return max_level;
    }

    let area = f64::from(geometry.width()) * f64::from(geometry.height());
    let max_side = (area * f64::from(fraction)).sqrt().floor();

    (0..max_level)
        .find(|&level| {
            geometry
                .tile_region_in_source(level, 0, 0)
                .is_some_and(|r| f64::from(r.width) <= max_side && f64::from(r.height) <= max_side)
        })
        .unwrap_or(max_level)
}
