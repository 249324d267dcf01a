use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tracing::{trace, warn};

use super::{check_entry_path, EntrySource, StorageSink};
use crate::error::StorageError;

/// Pyramid store backed by a local directory tree.
///
/// Entries are written to `<root>/<path>`, creating intermediate
/// directories on demand. Files left by an earlier run are overwritten, but
/// appending the same path twice through one instance is an error.
#[derive(Debug)]
pub struct DirectoryStorage {
    root: PathBuf,
    written: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl DirectoryStorage {
    /// Create (if needed) and open `root` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if `root` exists and is not a
    /// directory.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        if root.exists() && !root.is_dir() {
            return Err(StorageError::AlreadyExists(root.display().to_string()));
        }
        create_dir(&root)?;
        Ok(Self::new(root))
    }

    /// Open an existing directory for reading.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StorageError::NotFound(root.display().to_string()));
        }
        Ok(Self::new(root))
    }

    fn new(root: PathBuf) -> Self {
        Self {
            root,
            written: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Claim `path` for this run and prepare its parent directory.
    fn prepare(&self, path: &str) -> Result<PathBuf, StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        check_entry_path(path)?;

        let inserted = self
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string());
        if !inserted {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }

        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        Ok(target)
    }
}

/// Create a directory and its parents; a directory created concurrently by
/// another writer counts as success.
fn create_dir(dir: &Path) -> Result<(), StorageError> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {
            warn!(dir = %dir.display(), "Directory created concurrently");
            Ok(())
        }
        Err(e) => Err(StorageError::io(dir, e)),
    }
}

impl StorageSink for DirectoryStorage {
    fn append_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>,
    {
        let target = self.prepare(path)?;
        let file = File::create(&target).map_err(|e| StorageError::io(&target, e))?;

        let mut writer = BufWriter::new(file);
        let result = producer(&mut writer)?;
        writer
            .into_inner()
            .map_err(|e| StorageError::io(&target, e.into_error()))?;

        trace!(path, "Wrote entry");
        Ok(result)
    }

    fn append_file(&self, path: &str, file: &Path) -> Result<(), StorageError> {
        let target = self.prepare(path)?;
        fs::copy(file, &target).map_err(|e| StorageError::io(file, e))?;
        trace!(path, source = %file.display(), "Copied entry");
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl EntrySource for DirectoryStorage {
    fn read_entry(&self, path: &str) -> Result<Bytes, StorageError> {
        check_entry_path(path)?;
        let target = self.root.join(path);
        match fs::read(&target) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(target.display().to_string()))
            }
            Err(e) => Err(StorageError::io(target, e)),
        }
    }
}
