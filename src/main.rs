//! dzi-pyramid - Build and read Deep Zoom image pyramids.
//!
//! This binary wires the command line to the library.

use clap::Parser;
use serde::Serialize;
use std::fs;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dzi_pyramid::{
    config::{BuildConfig, Cli, Command, ExtractConfig, InfoConfig},
    encode, open_source, DeepZoomReader, Destination, DziFile, ImageSource, PyramidBuilder,
    PyramidError, StorageSink, TileFormat,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Build(config) => run_build(config),
        Command::Extract(config) => run_extract(config),
        Command::Info(config) => run_info(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dzi_pyramid=debug"
    } else {
        "dzi_pyramid=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Log a failed command and map it to an exit code.
fn finish(command: &str, result: Result<(), PyramidError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{} failed: {}", command, e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Build Command
// =============================================================================

fn run_build(config: BuildConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    finish("build", build(&config))
}

fn build(config: &BuildConfig) -> Result<(), PyramidError> {
    let tile_format = TileFormat::parse(&config.tile_format())?.with_jpeg_quality(config.jpeg_quality);
    let builder = PyramidBuilder::new(
        config.tile_size,
        config.overlap,
        tile_format.extension(),
        &config.descriptor_ext,
    )?
    .with_tile_format(tile_format);

    let source = open_source(&config.input)?;
    let destination = Destination::from_uri(&config.output, &config.s3_settings())?;

    let summary = builder.build(source.as_ref(), &config.name(), &destination, &config.build_options())?;
    destination.close()?;

    info!(
        "Wrote {} tiles over {} levels to {}",
        summary.tiles_written,
        summary.max_level + 1,
        config.output
    );
    Ok(())
}

// =============================================================================
// Extract Command
// =============================================================================

fn run_extract(config: ExtractConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    finish("extract", extract(&config))
}

fn extract(config: &ExtractConfig) -> Result<(), PyramidError> {
    let format = TileFormat::parse(&config.output_format())?.with_jpeg_quality(config.jpeg_quality);
    let reader = DeepZoomReader::open(&config.dzi)?;
    let region = config.region(reader.width(), reader.height());

    let image = reader.read_region(region, config.zoom)?;
    let bytes = encode(&image, &format)?;
    fs::write(&config.output, &bytes)
        .map_err(|e| dzi_pyramid::StorageError::io(&config.output, e))?;

    info!(
        "Wrote {}x{} region {} to {}",
        image.width(),
        image.height(),
        region,
        config.output.display()
    );
    Ok(())
}

// =============================================================================
// Info Command
// =============================================================================

/// Descriptor and level layout of a pyramid.
#[derive(Debug, Serialize)]
struct PyramidInfo {
    #[serde(flatten)]
    descriptor: DziFile,
    max_level: u32,
    levels: Vec<LevelInfo>,
}

#[derive(Debug, Serialize)]
struct LevelInfo {
    level: u32,
    width: u32,
    height: u32,
    columns: u32,
    rows: u32,
}

fn run_info(config: InfoConfig) -> ExitCode {
    finish("info", info(&config))
}

fn info(config: &InfoConfig) -> Result<(), PyramidError> {
    let reader = DeepZoomReader::open(&config.dzi)?;
    let geometry = reader.geometry();

    let report = PyramidInfo {
        descriptor: reader.descriptor().clone(),
        max_level: geometry.max_level(),
        levels: (0..=geometry.max_level())
            .map(|level| {
                let (width, height) = geometry.level_dimensions(level);
                let (columns, rows) = geometry.grid_size(level);
                LevelInfo {
                    level,
                    width,
                    height,
                    columns,
                    rows,
                }
            })
            .collect(),
    };

    if config.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| PyramidError::InvalidParameters(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    let descriptor = &report.descriptor;
    println!("{}", config.dzi.display());
    println!("  Size:      {}x{}", descriptor.width, descriptor.height);
    println!("  Tile size: {} (overlap {})", descriptor.tile_size, descriptor.overlap);
    println!("  Format:    {}", descriptor.format);
    println!("  Levels:    {}", report.levels.len());
    for level in &report.levels {
        println!(
            "    {:>3}  {:>7}x{:<7} {:>5}x{:<5} tiles",
            level.level, level.width, level.height, level.columns, level.rows
        );
    }
    Ok(())
}
