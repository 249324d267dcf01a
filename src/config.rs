//! Command line configuration for the `dzi-pyramid` binary.
//!
//! Every option can also be set through an environment variable with the
//! `DZI_` prefix:
//!
//! - `DZI_TILE_SIZE` - Tile size without overlap (default: 254)
//! - `DZI_OVERLAP` - Overlap between adjacent tiles (default: 1)
//! - `DZI_TILE_FORMAT` - Tile format (default: extension of the input)
//! - `DZI_DESCRIPTOR_EXT` - Descriptor extension (default: dzi)
//! - `DZI_PARALLELISM` - Worker threads (default: number of CPUs)
//! - `DZI_CACHE_FRACTION` - Share of the image cached per subtree (default: 0)
//! - `DZI_JPEG_QUALITY` - JPEG quality (default: 80)
//! - `DZI_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `DZI_S3_REGION` - AWS region (default: us-east-1)

use std::path::{Path, PathBuf};
use std::thread;

use clap::{Args, Parser, Subcommand};

use crate::builder::{BuildOptions, DEFAULT_DESCRIPTOR_EXT, DEFAULT_OVERLAP, DEFAULT_TILE_SIZE};
use crate::pyramid::{base_name, Rect};
use crate::raster::codec::{is_valid_quality, DEFAULT_JPEG_QUALITY};
use crate::storage::S3Settings;

// =============================================================================
// Default Values
// =============================================================================

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Tile format used when the input has no usable extension.
pub const FALLBACK_TILE_FORMAT: &str = "png";

// =============================================================================
// CLI Arguments
// =============================================================================

/// dzi-pyramid - Build and read Deep Zoom image pyramids.
#[derive(Parser, Debug, Clone)]
#[command(name = "dzi-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Tile an image into a Deep Zoom pyramid.
    Build(BuildConfig),

    /// Read a region of a pyramid into an image file.
    Extract(ExtractConfig),

    /// Print the descriptor and level layout of a pyramid.
    Info(InfoConfig),
}

/// Options of the `build` command.
#[derive(Args, Debug, Clone)]
pub struct BuildConfig {
    /// Image to tile.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Destination directory, `.tar` archive, `file://` URI or `s3://bucket/prefix`.
    #[arg(short, long)]
    pub output: String,

    /// Base name of the descriptor and tile directory.
    ///
    /// Defaults to the file name of the input without its extension.
    #[arg(long)]
    pub name: Option<String>,

    // =========================================================================
    // Tiling
    // =========================================================================
    /// Tile size in pixels, excluding overlap.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "DZI_TILE_SIZE")]
    pub tile_size: u32,

    /// Pixels shared by adjacent tiles.
    #[arg(long, default_value_t = DEFAULT_OVERLAP, env = "DZI_OVERLAP")]
    pub overlap: u32,

    /// Tile format (png, jpg, tif, bmp).
    ///
    /// Defaults to the format of the input image.
    #[arg(long, env = "DZI_TILE_FORMAT")]
    pub tile_format: Option<String>,

    /// Extension of the descriptor file.
    #[arg(long, default_value = DEFAULT_DESCRIPTOR_EXT, env = "DZI_DESCRIPTOR_EXT")]
    pub descriptor_ext: String,

    /// JPEG quality for jpg tiles (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "DZI_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    // =========================================================================
    // Resources
    // =========================================================================
    /// Number of worker threads.
    ///
    /// Defaults to the number of logical CPUs.
    #[arg(short, long, env = "DZI_PARALLELISM")]
    pub parallelism: Option<usize>,

    /// Largest share of the image held in memory by one subtree (0 to 1).
    ///
    /// 0 reads every full resolution tile from the source separately.
    #[arg(long, default_value_t = 0.0, env = "DZI_CACHE_FRACTION")]
    pub cache_fraction: f32,

    // =========================================================================
    // S3 Configuration
    // =========================================================================
    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "DZI_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "DZI_S3_REGION")]
    pub s3_region: String,
}

impl BuildConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.overlap >= self.tile_size {
            return Err(format!(
                "overlap ({}) must be smaller than tile_size ({})",
                self.overlap, self.tile_size
            ));
        }
        if self.parallelism == Some(0) {
            return Err("parallelism must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.cache_fraction) {
            return Err("cache_fraction must be between 0 and 1".to_string());
        }
        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.output.is_empty() {
            return Err("output destination is required".to_string());
        }
        if self.name().is_empty() {
            return Err(format!(
                "cannot derive a pyramid name from {}, set --name",
                self.input.display()
            ));
        }
        Ok(())
    }

    /// Pyramid base name.
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => base_name(name).to_string(),
            None => self
                .input
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| base_name(name).to_string())
                .unwrap_or_default(),
        }
    }

    /// Tile format, falling back to the input's extension.
    pub fn tile_format(&self) -> String {
        self.tile_format
            .clone()
            .or_else(|| extension_of(&self.input))
            .unwrap_or_else(|| FALLBACK_TILE_FORMAT.to_string())
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            parallelism: self
                .parallelism
                .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get())),
            cache_fraction: self.cache_fraction,
        }
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
        }
    }
}

/// Options of the `extract` command.
#[derive(Args, Debug, Clone)]
pub struct ExtractConfig {
    /// Descriptor of the pyramid.
    #[arg(long)]
    pub dzi: PathBuf,

    /// Image file to write; its extension selects the format.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Left edge of the region, in full resolution pixels.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub x: i64,

    /// Top edge of the region, in full resolution pixels.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub y: i64,

    /// Region width. Defaults to the rest of the image.
    #[arg(long)]
    pub width: Option<u32>,

    /// Region height. Defaults to the rest of the image.
    #[arg(long)]
    pub height: Option<u32>,

    /// Scale of the output relative to full resolution.
    #[arg(long, default_value_t = 1.0)]
    pub zoom: f64,

    /// JPEG quality when writing jpg output (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "DZI_JPEG_QUALITY")]
    pub jpeg_quality: u8,
}

impl ExtractConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.zoom.is_finite() && self.zoom > 0.0) {
            return Err("zoom must be greater than 0".to_string());
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err("region width and height must be greater than 0".to_string());
        }
        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if extension_of(&self.output).is_none() {
            return Err(format!(
                "cannot tell the image format of {}",
                self.output.display()
            ));
        }
        Ok(())
    }

    /// Requested region of an image of the given size.
    pub fn region(&self, image_width: u32, image_height: u32) -> Rect {
        let rest = |size: u32, start: i64| (i64::from(size) - start).clamp(0, i64::from(u32::MAX)) as u32;
        Rect::new(
            self.x,
            self.y,
            self.width.unwrap_or_else(|| rest(image_width, self.x)),
            self.height.unwrap_or_else(|| rest(image_height, self.y)),
        )
    }

    /// Output format identifier.
    pub fn output_format(&self) -> String {
        extension_of(&self.output).unwrap_or_else(|| FALLBACK_TILE_FORMAT.to_string())
    }
}

/// Options of the `info` command.
#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Descriptor of the pyramid.
    #[arg(long)]
    pub dzi: PathBuf,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
}

// =============================================================================
// Tests
// =============================================================================
