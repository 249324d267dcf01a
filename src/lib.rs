//! # dzi-pyramid
//!
//! Builds Deep Zoom Image (DZI) tile pyramids from a source image and reads
//! regions back out of them.
//!
//! A pyramid is a `.dzi` XML descriptor plus a `<name>_files/` directory
//! holding one sub-directory per level, each filled with tiles named
//! `<col>_<row>.<format>`. Level `max_level` is the full resolution image;
//! every level below halves the previous one, down to a single pixel.
//!
//! ## Features
//!
//! - **Single pass over the source**: every full resolution tile is read once,
//!   coarser tiles are stitched and downsampled from their children
//! - **Fork-join parallelism**: subtrees are built on a `rayon` pool
//! - **Subtree caching**: large reads amortise slow sources
//! - **Pluggable storage**: local directories, tar archives, memory, or S3
//! - **Region reads**: any rectangle at any zoom, served from the closest level
//!
//! ## Architecture
//!
//! - [`pyramid`] - Level and tile geometry, descriptor format
//! - [`raster`] - Pixel buffers, resampling, stitching and codecs
//! - [`source`] - Images being tiled, TIFFs read chunk by chunk
//! - [`storage`] - Where pyramid entries are written and read
//! - [`builder`] - Pyramid construction
//! - [`reader`] - Region reads from a built pyramid
//! - [`config`] - CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use dzi_pyramid::{BuildOptions, DeepZoomReader, DirectoryStorage, InMemorySource, PyramidBuilder, Rect};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), dzi_pyramid::PyramidError> {
//! let source = InMemorySource::open(Path::new("scan.png"))?;
//! let storage = DirectoryStorage::create("out")?;
//! PyramidBuilder::default().build(&source, "scan", &storage, &BuildOptions::default())?;
//!
//! let reader = DeepZoomReader::open("out/scan.dzi")?;
//! let thumbnail = reader.read_region(Rect::new(0, 0, 1000, 1000), 0.1)?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod pyramid;
pub mod raster;
pub mod reader;
pub mod source;
pub mod storage;

// Re-export commonly used types
pub use builder::{cache_level, BuildOptions, BuildSummary, PyramidBuilder, SourceCache};
pub use config::{BuildConfig, Cli, Command, ExtractConfig, InfoConfig};
pub use error::{DescriptorError, PyramidError, StorageError};
pub use pyramid::{DziFile, PyramidGeometry, Rect};
pub use raster::{decode, encode, PixelLayout, Raster, SampleType, Samples, TileFormat};
pub use reader::DeepZoomReader;
pub use source::{open_source, ImageSource, InMemorySource, TiffSource};
pub use storage::{
    Destination, DirectoryStorage, EntrySource, MemoryStorage, S3Settings, S3Storage, StorageSink,
    TarStorage,
};
