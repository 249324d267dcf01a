use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tracing::trace;

use super::{check_entry_path, EntrySource, StorageSink};
use crate::error::StorageError;

/// Pyramid store kept in memory.
///
/// Useful to build a pyramid and read it back within one process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Bytes>>,
    closed: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Paths of all entries, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Content of an entry, if present.
    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.lock().get(path).cloned()
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> BTreeMap<String, Bytes> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Bytes>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        let mut entries = self.lock();
        if entries.contains_key(path) {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        entries.insert(path.to_string(), data);
        trace!(path, "Stored entry");
        Ok(())
    }
}

impl StorageSink for MemoryStorage {
    fn append_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed.into());
        }
        check_entry_path(path)?;

        let mut buffer = Vec::new();
        let result = producer(&mut buffer)?;
        self.insert(path, Bytes::from(buffer))?;
        Ok(result)
    }

    fn append_file(&self, path: &str, file: &Path) -> Result<(), StorageError> {
        check_entry_path(path)?;
        let data = fs::read(file).map_err(|e| StorageError::io(file, e))?;
        self.insert(path, Bytes::from(data))
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl EntrySource for MemoryStorage {
    fn read_entry(&self, path: &str) -> Result<Bytes, StorageError> {
        self.get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}
