use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tar::{Builder, Header};
use tracing::{debug, trace};

use super::{check_entry_path, StorageSink};
use crate::error::StorageError;

type ArchiveWriter = Builder<BufWriter<File>>;

/// Pyramid store written as a single tar archive.
///
/// Entries from concurrent workers are appended one at a time. Small entries
/// are buffered in memory before they are appended, large ones are spilled
/// to a temporary file. The archive is only complete once [`close`] has
/// written its end-of-archive marker.
///
/// [`close`]: StorageSink::close
pub struct TarStorage {
    path: PathBuf,
    builder: Mutex<Option<ArchiveWriter>>,
    written: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for TarStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarStorage")
            .field("path", &self.path)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TarStorage {
    /// Create a new archive at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if `path` exists.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.display().to_string()));
            }
            Err(e) => return Err(StorageError::io(&path, e)),
        };
        debug!(path = %path.display(), "Created tar archive");

        Ok(Self {
            builder: Mutex::new(Some(Builder::new(BufWriter::new(file)))),
            path,
            written: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claim `path` for this archive.
    fn claim(&self, path: &str) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        check_entry_path(path)?;

        let inserted = self
            .written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string());
        if inserted {
            Ok(())
        } else {
            Err(StorageError::AlreadyExists(path.to_string()))
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ArchiveWriter>> {
        self.builder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `size` bytes read from `data` as entry `path`.
    fn append(&self, path: &str, size: u64, data: impl io::Read) -> Result<(), StorageError> {
        let mut header = Header::new_gnu();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0),
        );

        let mut guard = self.lock();
        let builder = guard.as_mut().ok_or(StorageError::Closed)?;
        builder
            .append_data(&mut header, path, data)
            .map_err(|e| StorageError::io(&self.path, e))?;
        trace!(path, size, "Appended tar entry");
        Ok(())
    }
}

impl StorageSink for TarStorage {
    fn append_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.claim(path)?;

        let mut buffer = Vec::new();
        let result = producer(&mut buffer)?;
        self.append(path, buffer.len() as u64, buffer.as_slice())?;
        Ok(result)
    }

    fn append_large_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.claim(path)?;

        // Removed by the OS once the handle is dropped
        let spill = tempfile::tempfile().map_err(|e| StorageError::io(std::env::temp_dir(), e))?;
        let mut writer = BufWriter::new(spill);
        let result = producer(&mut writer)?;
        let mut spill = writer
            .into_inner()
            .map_err(|e| StorageError::io(path, e.into_error()))?;

        let size = spill
            .seek(SeekFrom::End(0))
            .and_then(|size| spill.rewind().map(|()| size))
            .map_err(|e| StorageError::io(path, e))?;
        self.append(path, size, spill)?;
        Ok(result)
    }

    fn append_file(&self, path: &str, file: &Path) -> Result<(), StorageError> {
        self.claim(path)?;

        let source = File::open(file).map_err(|e| StorageError::io(file, e))?;
        let size = source
            .metadata()
            .map_err(|e| StorageError::io(file, e))?
            .len();
        self.append(path, size, source)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        let Some(builder) = self.lock().take() else {
            return Ok(());
        };

        let mut writer = builder
            .into_inner()
            .map_err(|e| StorageError::io(&self.path, e))?;
        writer.flush().map_err(|e| StorageError::io(&self.path, e))?;
        debug!(path = %self.path.display(), "Finished tar archive");
        Ok(())
    }
}
