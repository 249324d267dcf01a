use std::path::PathBuf;

use thiserror::Error;

use crate::pyramid::Rect;

/// Errors raised by storage backends while persisting or reading entries.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Target already exists and cannot be reused
    #[error("Destination already exists: {0}")]
    AlreadyExists(String),

    /// Entry does not exist in the store
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Destination identifier could not be mapped to a backend
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// The sink was already closed
    #[error("Storage sink is closed")]
    Closed,
}

impl StorageError {
    /// I/O error on `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while parsing a DZI descriptor document.
#[derive(Debug, Clone, Error)]
pub enum DescriptorError {
    /// The document is not well formed
    #[error("Malformed descriptor: {0}")]
    Parse(String),

    /// Root element is not `Image`
    #[error("Unsupported dzi file: root element is <{found}>, expected <Image>")]
    UnexpectedRoot { found: String },

    /// A required attribute is absent
    #[error("Missing attribute {attribute} on <{element}>")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    /// An attribute could not be parsed
    #[error("Invalid value {value:?} for attribute {attribute}")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
    },
}

/// Errors raised while building or reading a pyramid.
#[derive(Debug, Error)]
pub enum PyramidError {
    /// Source or tile bytes could not be decoded
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// Tile could not be encoded
    #[error("Failed to encode image: {message}")]
    Encode { message: String },

    /// No encoder exists for the requested tile format
    #[error("No {format} image writer found")]
    UnsupportedFormat { format: String },

    /// Builder or request parameters are inconsistent
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Requested region has zero area
    #[error("Region cannot be empty")]
    EmptyRegion,

    /// Zoom rounds the requested output down to nothing
    #[error("Zoom {zoom} too small for width or height")]
    ZoomTooSmall { zoom: f64 },

    /// Requested region lies outside the readable bounds
    #[error("Region {region} outside of {bounds}")]
    RegionOutOfBounds { region: Rect, bounds: Rect },

    /// Read outside the region held by a subtree cache
    #[error("Region {region} is outside of cached region {cached}")]
    OutsideCache { region: Rect, cached: Rect },

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Descriptor failure
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Task skipped because another task already failed
    #[error("Build aborted after an earlier failure")]
    Aborted,
}
