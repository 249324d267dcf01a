use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::trace;

use super::cache::SourceCache;
use crate::error::{PyramidError, StorageError};
use crate::pyramid::{tile_path, PyramidGeometry};
use crate::raster::{codec, resize, stitch, Raster, Seams, TileFormat};
use crate::source::ImageSource;
use crate::storage::StorageSink;

/// Shared state of one pyramid build.
///
/// `compute` produces the tile at `(level, row, col)` from its four children
/// at `level + 1`, writes it, and hands the raster back to the parent.
/// Full resolution tiles are read from the source, or from the subtree
/// cache once one exists.
pub(crate) struct TileTask<'a, S> {
    pub geometry: PyramidGeometry,
    pub source: &'a dyn ImageSource,
    pub sink: &'a S,
    pub format: &'a TileFormat,
    pub base_name: &'a str,
    /// Fork children onto the worker pool
    pub fork: bool,
    /// Level whose tiles cache their source footprint, if caching is on
    pub cache_level: Option<u32>,
    failed: AtomicBool,
    tiles_written: AtomicUsize,
}

impl<'a, S: StorageSink> TileTask<'a, S> {
    pub fn new(
        geometry: PyramidGeometry,
        source: &'a dyn ImageSource,
        sink: &'a S,
        format: &'a TileFormat,
        base_name: &'a str,
    ) -> Self {
        Self {
            geometry,
            source,
            sink,
            format,
            base_name,
            fork: false,
            cache_level: None,
            failed: AtomicBool::new(false),
            tiles_written: AtomicUsize::new(0),
        }
    }

    pub fn tiles_written(&self) -> usize {
        self.tiles_written.load(Ordering::Relaxed)
    }

    /// Build the tile and its whole subtree.
    ///
    /// Returns `Ok(None)` for addresses outside the level's tile grid. Once
    /// any tile has failed, tasks that have not started yet return
    /// [`PyramidError::Aborted`].
    pub fn compute(
        &self,
        level: u32,
        row: u32,
        col: u32,
        cache: Option<&SourceCache>,
    ) -> Result<Option<Raster>, PyramidError> {
        if self.failed.load(Ordering::Relaxed) {
            return Err(PyramidError::Aborted);
        }
        let result = self.compute_tile(level, row, col, cache);
        if result.is_err() {
            self.failed.store(true, Ordering::Relaxed);
        }
        result
    }

    fn compute_tile(
        &self,
        level: u32,
        row: u32,
        col: u32,
        cache: Option<&SourceCache>,
    ) -> Result<Option<Raster>, PyramidError> {
        let Some(region) = self.geometry.tile_region(level, row, col) else {
            return Ok(None);
        };

        let tile = if level == self.geometry.max_level() {
            match cache {
                Some(cache) => cache.read_region(region)?,
                None => self.source.read_region(region)?,
            }
        } else {
            let filled;
            let cache = match self.cache_level {
                Some(cache_level) if cache_level == level => {
                    let footprint = self
                        .geometry
                        .tile_region_in_source(level, row, col)
                        .ok_or(PyramidError::EmptyRegion)?;
                    filled = SourceCache::fill(self.source, footprint)?;
                    Some(&filled)
                }
                _ => cache,
            };

            let [top_left, top_right, bottom_left, bottom_right] =
                self.compute_children(level, row, col, cache)?;
            let top_left = top_left.ok_or_else(|| {
                PyramidError::InvalidParameters(format!(
                    "tile ({level}, {row}, {col}) has no top-left child"
                ))
            })?;

            let composite = stitch(
                top_left,
                top_right,
                bottom_left,
                bottom_right,
                Seams::of_parent(self.geometry.tile_size(), self.geometry.overlap(), row, col),
            )?;
            resize(composite, region.width, region.height)?
        };

        self.write(level, row, col, &tile)?;
        Ok(Some(tile))
    }

    fn compute_children(
        &self,
        level: u32,
        row: u32,
        col: u32,
        cache: Option<&SourceCache>,
    ) -> Result<[Option<Raster>; 4], PyramidError> {
        let child = level + 1;
        let (r, c) = (row * 2, col * 2);

        // Subtrees at or below the cache level read from memory; forking
        // them would only add scheduling overhead.
        let below_cache = self.cache_level.is_some_and(|cache_level| level >= cache_level);

        let children = if self.fork && !below_cache {
            let ((top_left, top_right), (bottom_left, bottom_right)) = rayon::join(
                || {
                    rayon::join(
                        || self.compute(child, r, c, cache),
                        || self.compute(child, r, c + 1, cache),
                    )
                },
                || {
                    rayon::join(
                        || self.compute(child, r + 1, c, cache),
                        || self.compute(child, r + 1, c + 1, cache),
                    )
                },
            );
            [top_left, top_right, bottom_left, bottom_right]
        } else {
            [
                self.compute(child, r, c, cache),
                self.compute(child, r, c + 1, cache),
                self.compute(child, r + 1, c, cache),
                self.compute(child, r + 1, c + 1, cache),
            ]
        };

        collect_children(children)
    }

    fn write(&self, level: u32, row: u32, col: u32, tile: &Raster) -> Result<(), PyramidError> {
        let path = tile_path(self.base_name, level, col, row, self.format.extension());
        let size = self.sink.append_entry(&path, |writer: &mut dyn Write| {
            let bytes = codec::encode(tile, self.format)?;
            writer
                .write_all(&bytes)
                .map_err(|e| StorageError::io(&path, e))?;
            Ok::<_, PyramidError>(bytes.len())
        })?;

        self.tiles_written.fetch_add(1, Ordering::Relaxed);
        trace!(level, row, col, size, "Wrote tile");
        Ok(())
    }
}

/// Unwrap the four child results, preferring a real failure over
/// [`PyramidError::Aborted`].
fn collect_children(
    children: [Result<Option<Raster>, PyramidError>; 4],
) -> Result<[Option<Raster>; 4], PyramidError> {
    let mut tiles: [Option<Raster>; 4] = Default::default();
    let mut error = None;

    for (slot, child) in tiles.iter_mut().zip(children) {
        match child {
            Ok(tile) => *slot = tile,
            Err(PyramidError::Aborted) => {
                error.get_or_insert(PyramidError::Aborted);
            }
            Err(e) => {
                if matches!(error, None | Some(PyramidError::Aborted)) {
                    error = Some(e);
                }
            }
        }
    }

    match error {
        Some(e) => Err(e),
        None => Ok(tiles),
    }
}
