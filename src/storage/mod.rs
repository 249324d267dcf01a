//! Persistence of pyramid entries.
//!
//! A pyramid is a set of named entries (the descriptor and one entry per
//! tile) addressed by forward-slash separated relative paths. The builder
//! writes entries through a [`StorageSink`]; the reader fetches them back
//! through an [`EntrySource`].
//!
//! # Backends
//!
//! - [`DirectoryStorage`]: a plain directory tree on the local filesystem
//! - [`TarStorage`]: a single tar archive on the local filesystem
//! - [`MemoryStorage`]: a map kept in memory, for tests and round-trips
//! - [`S3Storage`]: objects under an `s3://bucket/prefix`
//!
//! [`Destination::from_uri`] picks a backend from a destination identifier.

mod archive;
mod directory;
mod memory;
mod s3;

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::error::StorageError;

pub use archive::TarStorage;
pub use directory::DirectoryStorage;
pub use memory::MemoryStorage;
pub use s3::{S3Settings, S3Storage};

/// Write side of a pyramid store.
///
/// Entries may be appended concurrently from several threads. The same path
/// is never appended twice within one run; a backend reports such a
/// collision as [`StorageError::AlreadyExists`].
pub trait StorageSink: Send + Sync {
    /// Append a small entry whose bytes are produced by `producer`.
    ///
    /// The producer receives a writer for the entry content. Its result is
    /// returned once the entry has been persisted.
    fn append_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>;

    /// Append an entry that may be too large to buffer in memory.
    ///
    /// Backends that stream to their destination use the same path as
    /// [`StorageSink::append_entry`].
    fn append_large_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.append_entry(path, producer)
    }

    /// Append the content of a local file.
    fn append_file(&self, path: &str, file: &Path) -> Result<(), StorageError>;

    /// Finish writing. Closing twice is allowed; appends after close fail
    /// with [`StorageError::Closed`].
    fn close(&self) -> Result<(), StorageError>;
}

/// Read side of a pyramid store.
pub trait EntrySource: Send + Sync {
    /// Fetch the bytes of an entry.
    fn read_entry(&self, path: &str) -> Result<Bytes, StorageError>;
}

/// Where a destination identifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Local directory
    Directory(PathBuf),
    /// Local tar archive
    Tar(PathBuf),
    /// S3 bucket and key prefix (without surrounding slashes)
    S3 { bucket: String, prefix: String },
}

impl Target {
    /// Classify a destination identifier.
    ///
    /// Plain paths and `file://` URLs map to directories, or to a tar
    /// archive when they end in `.tar`. `s3://bucket/prefix` maps to S3.
    /// Sequence files (`.seq`) and other schemes are rejected.
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        if uri.to_ascii_lowercase().ends_with(".seq") {
            return Err(StorageError::InvalidDestination(format!(
                "{uri}: .seq archives are not supported"
            )));
        }

        let url = match Url::parse(uri) {
            // One letter schemes are Windows drive letters
            Ok(url) if url.scheme().len() > 1 => url,
            _ => return Ok(Target::local(PathBuf::from(uri))),
        };

        match url.scheme() {
            "file" => url
                .to_file_path()
                .map(Target::local)
                .map_err(|_| StorageError::InvalidDestination(uri.to_string())),
            "s3" => {
                let bucket = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| {
                        StorageError::InvalidDestination(format!("{uri}: missing bucket name"))
                    })?;
                Ok(Target::S3 {
                    bucket: bucket.to_string(),
                    prefix: url.path().trim_matches('/').to_string(),
                })
            }
            scheme => Err(StorageError::InvalidDestination(format!(
                "{uri}: unsupported scheme {scheme}"
            ))),
        }
    }

    fn local(path: PathBuf) -> Self {
        let is_tar = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tar"));
        if is_tar {
            Target::Tar(path)
        } else {
            Target::Directory(path)
        }
    }
}

/// A storage backend selected at startup.
pub enum Destination {
    Directory(DirectoryStorage),
    Tar(TarStorage),
    S3(S3Storage),
}

impl Destination {
    /// Open the backend a destination identifier points to.
    pub fn from_uri(uri: &str, s3: &S3Settings) -> Result<Self, StorageError> {
        let target = Target::parse(uri)?;
        debug!(uri, target = ?target, "Selected destination");

        match target {
            Target::Directory(path) => Ok(Destination::Directory(DirectoryStorage::create(path)?)),
            Target::Tar(path) => Ok(Destination::Tar(TarStorage::create(path)?)),
            Target::S3 { bucket, prefix } => {
                Ok(Destination::S3(S3Storage::connect(bucket, prefix, s3)?))
            }
        }
    }
}

impl StorageSink for Destination {
    fn append_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>,
    {
        match self {
            Destination::Directory(storage) => storage.append_entry(path, producer),
            Destination::Tar(storage) => storage.append_entry(path, producer),
            Destination::S3(storage) => storage.append_entry(path, producer),
        }
    }

    fn append_large_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>,
    {
        match self {
            Destination::Directory(storage) => storage.append_large_entry(path, producer),
            Destination::Tar(storage) => storage.append_large_entry(path, producer),
            Destination::S3(storage) => storage.append_large_entry(path, producer),
        }
    }

    fn append_file(&self, path: &str, file: &Path) -> Result<(), StorageError> {
        match self {
            Destination::Directory(storage) => storage.append_file(path, file),
            Destination::Tar(storage) => storage.append_file(path, file),
            Destination::S3(storage) => storage.append_file(path, file),
        }
    }

    fn close(&self) -> Result<(), StorageError> {
        match self {
            Destination::Directory(storage) => storage.close(),
            Destination::Tar(storage) => storage.close(),
            Destination::S3(storage) => storage.close(),
        }
    }
}

/// Validate a relative entry path: non-empty, forward slashes, no `..`.
pub(crate) fn check_entry_path(path: &str) -> Result<(), StorageError> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidDestination(format!(
            "invalid entry path {path:?}"
        )))
    }
}
