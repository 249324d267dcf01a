//! Subtree cache integration tests.
//!
//! Tests verify:
//! - Cache fraction does not change the output
//! - Cached subtrees read their whole footprint in one request
//! - A fraction of 1 reads the source exactly once

use std::collections::HashSet;

use dzi_pyramid::{cache_level, InMemorySource, PyramidBuilder, PyramidGeometry, Rect};

use super::test_utils::{build_in_memory, entries, gradient_rgb, options, TrackingSource};

#[test]
fn test_cache_fraction_does_not_change_output() {
    let raster = gradient_rgb(400, 300);
    let builder = PyramidBuilder::new(64, 1, "png", "dzi").unwrap();

    let uncached = build_in_memory(&InMemorySource::new(raster.clone()), &builder, &options(1, 0.0));
    for (parallelism, fraction) in [(1, 0.5), (4, 0.5), (1, 1.0), (4, 1.0)] {
        let cached = build_in_memory(
            &InMemorySource::new(raster.clone()),
            &builder,
            &options(parallelism, fraction),
        );
        assert_eq!(
            entries(&uncached),
            entries(&cached),
            "parallelism {parallelism}, fraction {fraction}"
        );
    }
}

#[test]
fn test_cached_subtrees_read_their_footprint() {
    let geometry = PyramidGeometry::new(64, 1, 400, 300).unwrap();
    let level = cache_level(&geometry, 0.5);
    assert!(level < geometry.max_level());

    let source = TrackingSource::new(gradient_rgb(400, 300));
    let builder = PyramidBuilder::new(64, 1, "png", "dzi").unwrap();
    build_in_memory(&source, &builder, &options(4, 0.5));

    let (columns, rows) = geometry.grid_size(level);
    let expected: HashSet<Rect> = (0..rows)
        .flat_map(|row| (0..columns).map(move |col| (row, col)))
        .filter_map(|(row, col)| geometry.tile_region_in_source(level, row, col))
        .collect();

    let reads = source.reads();
    assert_eq!(reads.len(), (columns * rows) as usize);
    assert_eq!(reads.into_iter().collect::<HashSet<_>>(), expected);
}

#[test]
fn test_full_cache_reads_source_once() {
    let source = TrackingSource::new(gradient_rgb(150, 90));
    let builder = PyramidBuilder::new(32, 1, "png", "dzi").unwrap();
    build_in_memory(&source, &builder, &options(2, 1.0));

    assert_eq!(source.read_count(), 1);
    assert_eq!(source.reads(), vec![Rect::new(0, 0, 150, 90)]);
}

#[test]
fn test_cache_fraction_boundary() {
    // Level with tiles just small enough is chosen, never a coarser one
    let geometry = PyramidGeometry::new(64, 1, 1000, 700).unwrap();
    for fraction in [0.01f32, 0.1, 0.3, 0.6, 0.9] {
        let level = cache_level(&geometry, fraction);
        let max_side = (1000.0f64 * 700.0 * f64::from(fraction)).sqrt().floor();

        let fits = |level: u32| {
            let region = geometry.tile_region_in_source(level, 0, 0).unwrap();
            f64::from(region.width) <= max_side && f64::from(region.height) <= max_side
        };

        if level < geometry.max_level() {
            assert!(fits(level), "fraction {fraction}");
        }
        if level > 0 {
            assert!(!fits(level - 1), "fraction {fraction}");
        }
    }
}
