//! Region read integration tests.
//!
//! Tests verify:
//! - Full resolution reads return the source pixels
//! - Reads at lower zooms are served from the closest level
//! - Regions partly or entirely outside the image
//! - Reading pyramids from a directory, and re-tiling a pyramid

use dzi_pyramid::{
    BuildOptions, DeepZoomReader, DirectoryStorage, ImageSource, InMemorySource, PyramidBuilder,
    PyramidError, Rect, StorageSink,
};

use super::test_utils::{build_in_memory, gradient_gray16, gradient_rgb, options, reader_for};

// =============================================================================
// Zoom 1
// =============================================================================

#[test]
fn test_whole_image_round_trip() {
    let raster = gradient_rgb(300, 200);
    let reader = reader_for(raster.clone(), 64, 1);

    assert_eq!(reader.read_whole_image(1.0).unwrap(), raster);
}

#[test]
fn test_region_round_trip() {
    let raster = gradient_rgb(300, 200);
    let reader = reader_for(raster.clone(), 64, 2);

    for region in [
        Rect::new(0, 0, 1, 1),
        Rect::new(63, 63, 3, 3),
        Rect::new(100, 50, 150, 120),
        Rect::new(256, 128, 44, 72),
    ] {
        assert_eq!(
            reader.read_region(region, 1.0).unwrap(),
            raster.crop(region).unwrap(),
            "{region}"
        );
    }
}

#[test]
fn test_sixteen_bit_round_trip() {
    let raster = gradient_gray16(70, 50);
    let reader = reader_for(raster.clone(), 16, 1);

    assert_eq!(reader.read_whole_image(1.0).unwrap(), raster);
}

// =============================================================================
// Lower Zooms
// =============================================================================

#[test]
fn test_half_zoom_uses_next_level() {
    let reader = reader_for(gradient_rgb(300, 200), 64, 1);
    let level = reader.max_level() - 1;
    assert_eq!(reader.closest_level(0.5), level);

    let half = reader.read_whole_image(0.5).unwrap();
    assert_eq!(half.dimensions(), (150, 100));
    assert_eq!(
        half,
        reader.read_region_of_level(Rect::new(0, 0, 150, 100), level).unwrap()
    );
}

#[test]
fn test_output_size_follows_zoom() {
    let reader = reader_for(gradient_rgb(300, 200), 64, 1);

    for (region, zoom, expected) in [
        (Rect::new(0, 0, 300, 200), 0.1, (30, 20)),
        (Rect::new(10, 10, 101, 51), 0.3, (30, 15)),
        (Rect::new(0, 0, 300, 200), 0.01, (3, 2)),
        (Rect::new(50, 50, 20, 10), 2.0, (40, 20)),
    ] {
        let image = reader.read_region(region, zoom).unwrap();
        assert_eq!(image.dimensions(), expected, "{region} at {zoom}");
    }
}

#[test]
fn test_zoom_too_small() {
    let reader = reader_for(gradient_rgb(300, 200), 64, 1);
    assert!(matches!(
        reader.read_region(Rect::new(0, 0, 300, 200), 0.001),
        Err(PyramidError::ZoomTooSmall { .. })
    ));
}

// =============================================================================
// Outside the Image
// =============================================================================

#[test]
fn test_partially_outside_region() {
    let raster = gradient_rgb(120, 80);
    let reader = reader_for(raster.clone(), 32, 1);

    let image = reader.read_region(Rect::new(-10, -20, 50, 60), 1.0).unwrap();
    assert_eq!(image.dimensions(), (50, 60));

    // Blank outside the image
    for c in 0..3 {
        assert_eq!(image.sample(5, 5, c), 0.0);
        assert_eq!(image.sample(49, 10, c), 0.0);
    }

    // Source pixels inside
    let inside = image.crop(Rect::new(10, 20, 40, 40)).unwrap();
    assert_eq!(inside, raster.crop(Rect::new(0, 0, 40, 40)).unwrap());
}

#[test]
fn test_region_past_bottom_right() {
    let raster = gradient_rgb(120, 80);
    let reader = reader_for(raster.clone(), 32, 1);

    let image = reader.read_region(Rect::new(100, 70, 40, 20), 1.0).unwrap();
    assert_eq!(image.dimensions(), (40, 20));
    assert_eq!(
        image.crop(Rect::new(0, 0, 20, 10)).unwrap(),
        raster.crop(Rect::new(100, 70, 20, 10)).unwrap()
    );
    assert_eq!(image.sample(30, 15, 0), 0.0);
}

#[test]
fn test_fully_outside_region() {
    let reader = reader_for(gradient_rgb(120, 80), 32, 1);

    for region in [
        Rect::new(120, 0, 10, 10),
        Rect::new(-10, -10, 10, 10),
        Rect::new(0, 500, 10, 10),
    ] {
        assert!(
            matches!(
                reader.read_region(region, 1.0),
                Err(PyramidError::RegionOutOfBounds { .. })
            ),
            "{region}"
        );
    }
}

#[test]
fn test_empty_region() {
    let reader = reader_for(gradient_rgb(120, 80), 32, 1);
    assert!(matches!(
        reader.read_region(Rect::new(0, 0, 10, 0), 1.0),
        Err(PyramidError::EmptyRegion)
    ));
}

// =============================================================================
// Directory Pyramids
// =============================================================================

#[test]
fn test_directory_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pyramids");
    let raster = gradient_rgb(140, 90);

    let storage = DirectoryStorage::create(&root).unwrap();
    let builder = PyramidBuilder::new(40, 1, "png", "dzi").unwrap();
    let summary = builder
        .build(&InMemorySource::new(raster.clone()), "scan.tif", &storage, &BuildOptions::default())
        .unwrap();
    storage.close().unwrap();

    assert!(root.join("scan.dzi").is_file());
    assert!(root.join(format!("scan_files/{}/3_2.png", summary.max_level)).is_file());
    assert!(root.join("scan_files/0/0_0.png").is_file());

    let reader = DeepZoomReader::open(root.join("scan.dzi")).unwrap();
    assert_eq!(reader.descriptor().width, 140);
    assert_eq!(reader.descriptor().format, "png");
    assert_eq!(reader.read_whole_image(1.0).unwrap(), raster);
}

#[test]
fn test_open_missing_pyramid() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        DeepZoomReader::open(dir.path().join("missing.dzi")),
        Err(PyramidError::Storage(_))
    ));
}

#[test]
fn test_retile_existing_pyramid() {
    let raster = gradient_rgb(130, 70);
    let reader = reader_for(raster.clone(), 32, 1);
    assert_eq!(reader.width(), 130);
    assert_eq!(reader.height(), 70);

    let builder = PyramidBuilder::new(50, 0, "png", "dzi").unwrap();
    let retiled = build_in_memory(&reader, &builder, &options(2, 0.0));
    let original = build_in_memory(&InMemorySource::new(raster), &builder, &options(2, 0.0));

    assert_eq!(retiled.0.entries(), original.0.entries());
}
