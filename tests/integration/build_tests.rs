//! Pyramid construction tests.
//!
//! Tests verify:
//! - Descriptor and tile layout of a 512x512 pyramid
//! - Stitched parents match the source under their children, for every overlap
//! - Each full resolution tile is read from the source exactly once
//! - Worker count does not change the output
//! - Failures surface as the original error

use std::collections::HashSet;
use std::fs::File;

use dzi_pyramid::raster::resize;
use dzi_pyramid::{
    decode, open_source, DziFile, ImageSource, InMemorySource, MemoryStorage, PixelLayout,
    PyramidBuilder, PyramidError, PyramidGeometry, Rect, SampleType, Samples, TiffSource,
};
use tiff::encoder::{colortype, TiffEncoder};

use super::test_utils::{
    build_in_memory, entries, gradient_gray16, gradient_rgb, options, TrackingSource,
};

// =============================================================================
// Layout
// =============================================================================

#[test]
fn test_512_pyramid_layout() {
    let source = InMemorySource::new(gradient_rgb(512, 512));
    let storage = build_in_memory(&source, &PyramidBuilder::default(), &options(2, 0.0));

    let xml = storage.0.get("img.dzi").unwrap();
    let dzi = DziFile::parse(std::str::from_utf8(&xml).unwrap()).unwrap();
    assert_eq!(dzi, DziFile::new(254, 1, "png", 512, 512));
    assert_eq!(dzi.max_level(), 9);

    let tile_dimensions = |path: &str| decode(&storage.0.get(path).unwrap()).unwrap().dimensions();

    // Full resolution: 3x3 grid
    assert_eq!(tile_dimensions("img_files/9/0_0.png"), (255, 255));
    assert_eq!(tile_dimensions("img_files/9/1_0.png"), (256, 255));
    assert_eq!(tile_dimensions("img_files/9/2_0.png"), (5, 255));
    assert_eq!(tile_dimensions("img_files/9/2_2.png"), (5, 5));
    assert!(storage.0.get("img_files/9/3_0.png").is_none());

    // 256x256: 2x2 grid
    assert_eq!(tile_dimensions("img_files/8/0_0.png"), (255, 255));
    assert_eq!(tile_dimensions("img_files/8/1_1.png"), (3, 3));

    // Single tile levels
    assert_eq!(tile_dimensions("img_files/7/0_0.png"), (128, 128));
    assert_eq!(tile_dimensions("img_files/0/0_0.png"), (1, 1));
    assert!(storage.0.get("img_files/7/1_0.png").is_none());

    // 9 + 4 + 8 single tile levels, plus the descriptor
    assert_eq!(storage.0.len(), 9 + 4 + 8 + 1);
}

#[test]
fn test_every_tile_matches_geometry() {
    let geometry = PyramidGeometry::new(30, 2, 97, 61).unwrap();
    let source = InMemorySource::new(gradient_rgb(97, 61));
    let builder = PyramidBuilder::new(30, 2, "png", "dzi").unwrap();
    let storage = build_in_memory(&source, &builder, &options(3, 0.0));

    for level in 0..=geometry.max_level() {
        let (columns, rows) = geometry.grid_size(level);
        for row in 0..rows {
            for col in 0..columns {
                let path = format!("img_files/{level}/{col}_{row}.png");
                let tile = decode(&storage.0.get(&path).unwrap()).unwrap();
                assert_eq!(tile.dimensions(), geometry.tile_dimensions(level, row, col), "{path}");
            }
        }
    }
}

#[test]
fn test_parent_tiles_match_source_footprint() {
    // Widths and heights where the last child column or row is clipped
    for overlap in 1..=3u32 {
        for (width, height) in [(5, 5), (9, 10), (25, 9), (10, 26), (41, 42), (45, 38)] {
            let raster = gradient_rgb(width, height);
            let geometry = PyramidGeometry::new(8, overlap, width, height).unwrap();
            let builder = PyramidBuilder::new(8, overlap, "png", "dzi").unwrap();
            let storage =
                build_in_memory(&InMemorySource::new(raster.clone()), &builder, &options(2, 0.0));

            let child_level = geometry.max_level();
            let level = child_level - 1;
            let (columns, rows) = geometry.grid_size(level);
            for row in 0..rows {
                for col in 0..columns {
                    let child = |r: u32, c: u32| geometry.tile_region(child_level, r, c);
                    let top_left = child(2 * row, 2 * col).unwrap();
                    let right = child(2 * row, 2 * col + 1).unwrap_or(top_left);
                    let bottom = child(2 * row + 1, 2 * col).unwrap_or(top_left);
                    let footprint = Rect::new(
                        top_left.x,
                        top_left.y,
                        (right.right() - top_left.x) as u32,
                        (bottom.bottom() - top_left.y) as u32,
                    );

                    let region = geometry.tile_region(level, row, col).unwrap();
                    let expected =
                        resize(raster.crop(footprint).unwrap(), region.width, region.height)
                            .unwrap();
                    let path = format!("img_files/{level}/{col}_{row}.png");
                    let tile = decode(&storage.0.get(&path).unwrap()).unwrap();
                    assert_eq!(tile, expected, "{width}x{height}, overlap {overlap}: {path}");
                }
            }
        }
    }
}

#[test]
fn test_full_resolution_tiles_are_source_crops() {
    let raster = gradient_rgb(200, 120);
    let geometry = PyramidGeometry::new(64, 1, 200, 120).unwrap();
    let source = InMemorySource::new(raster.clone());
    let builder = PyramidBuilder::new(64, 1, "png", "dzi").unwrap();
    let storage = build_in_memory(&source, &builder, &options(1, 0.0));

    let max_level = geometry.max_level();
    let (columns, rows) = geometry.grid_size(max_level);
    for row in 0..rows {
        for col in 0..columns {
            let region = geometry.tile_region(max_level, row, col).unwrap();
            let tile = decode(&storage.0.get(&format!("img_files/{max_level}/{col}_{row}.png")).unwrap())
                .unwrap();
            assert_eq!(tile, raster.crop(region).unwrap(), "{region}");
        }
    }
}

#[test]
fn test_sixteen_bit_source() {
    let source = InMemorySource::new(gradient_gray16(90, 40));
    let builder = PyramidBuilder::new(32, 1, "png", "dzi").unwrap();
    let storage = build_in_memory(&source, &builder, &options(2, 0.0));

    for path in ["img_files/7/2_1.png", "img_files/5/0_0.png", "img_files/0/0_0.png"] {
        let tile = decode(&storage.0.get(path).unwrap()).unwrap();
        assert_eq!(tile.layout(), PixelLayout::Gray, "{path}");
        assert_eq!(tile.sample_type(), SampleType::U16, "{path}");
    }
}

// =============================================================================
// Source Access
// =============================================================================

#[test]
fn test_each_source_tile_read_once() {
    let geometry = PyramidGeometry::new(40, 1, 230, 170).unwrap();
    let source = TrackingSource::new(gradient_rgb(230, 170));
    let builder = PyramidBuilder::new(40, 1, "png", "dzi").unwrap();
    build_in_memory(&source, &builder, &options(4, 0.0));

    let max_level = geometry.max_level();
    let (columns, rows) = geometry.grid_size(max_level);
    let expected: HashSet<Rect> = (0..rows)
        .flat_map(|row| (0..columns).map(move |col| (row, col)))
        .filter_map(|(row, col)| geometry.tile_region(max_level, row, col))
        .collect();

    let reads = source.reads();
    assert_eq!(reads.len(), expected.len());
    assert_eq!(reads.into_iter().collect::<HashSet<_>>(), expected);
}

#[test]
fn test_parallelism_does_not_change_output() {
    let raster = gradient_rgb(301, 187);
    let builder = PyramidBuilder::new(50, 2, "png", "dzi").unwrap();

    let sequential = build_in_memory(&InMemorySource::new(raster.clone()), &builder, &options(1, 0.0));
    let parallel = build_in_memory(&InMemorySource::new(raster), &builder, &options(4, 0.0));

    assert_eq!(entries(&sequential), entries(&parallel));
}

#[test]
fn test_build_from_tiff_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.tif");
    let raster = gradient_rgb(233, 151);
    let Samples::U8(pixels) = raster.samples() else {
        panic!("gradient is 8-bit");
    };
    {
        let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
        let mut image = encoder.new_image::<colortype::RGB8>(233, 151).unwrap();
        image.rows_per_strip(16).unwrap();
        image.write_data(pixels).unwrap();
    }

    let source = TiffSource::open(&path).unwrap();
    assert_eq!(source.chunk_dimensions(), (233, 16));
    let opened = open_source(&path).unwrap();
    assert_eq!(opened.bounds(), raster.bounds());

    let builder = PyramidBuilder::new(64, 2, "png", "dzi").unwrap();
    let from_disk = build_in_memory(&source, &builder, &options(4, 0.3));
    let from_memory = build_in_memory(&InMemorySource::new(raster), &builder, &options(1, 0.0));
    assert_eq!(entries(&from_disk), entries(&from_memory));

    let from_opened = build_in_memory(opened.as_ref(), &builder, &options(2, 0.0));
    assert_eq!(entries(&from_opened), entries(&from_memory));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_unsupported_tile_format() {
    assert!(matches!(
        PyramidBuilder::new(254, 1, "gif", "dzi"),
        Err(PyramidError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        PyramidBuilder::new(254, 1, "xyz", "dzi"),
        Err(PyramidError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_source_failure_is_reported() {
    for parallelism in [1, 4] {
        let source = TrackingSource::new(gradient_rgb(200, 200)).failing_on(Rect::new(150, 150, 1, 1));
        let sink = MemoryStorage::new();
        let builder = PyramidBuilder::new(32, 1, "png", "dzi").unwrap();

        let result = builder.build(&source, "img", &sink, &options(parallelism, 0.0));
        assert!(
            matches!(result, Err(PyramidError::Decode { .. })),
            "parallelism {parallelism}: {result:?}"
        );
        // The level 0 tile depends on every other tile
        assert!(sink.get("img_files/0/0_0.png").is_none());
    }
}

#[test]
fn test_empty_source_rejected() {
    let source = InMemorySource::new(gradient_rgb(0, 0));
    let sink = MemoryStorage::new();
    assert!(matches!(
        PyramidBuilder::default().build(&source, "img", &sink, &options(1, 0.0)),
        Err(PyramidError::InvalidParameters(_))
    ));
    assert!(sink.is_empty());
}
