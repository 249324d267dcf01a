use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::runtime::Runtime;
use tracing::{debug, trace};

use super::{check_entry_path, StorageSink};
use crate::error::StorageError;

/// Connection settings for S3 or S3-compatible storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    /// Custom endpoint URL (MinIO, etc.); `None` for AWS
    pub endpoint: Option<String>,
    pub region: String,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: "us-east-1".to_string(),
        }
    }
}

impl S3Settings {
    /// Custom endpoints (MinIO and the like) address buckets as
    /// `endpoint/bucket/key` rather than through a bucket subdomain.
    fn path_style(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Client for these settings, with credentials from the environment.
    async fn client(&self) -> Client {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(self.region.clone()));
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(self.path_style())
            .build();
        Client::from_conf(config)
    }
}

/// Pyramid store writing one object per entry under `s3://bucket/prefix/`.
///
/// Tile workers are synchronous, so the store owns a Tokio runtime and
/// blocks on each upload. Entries are buffered in memory before upload.
pub struct S3Storage {
    runtime: Runtime,
    client: Client,
    bucket: String,
    prefix: String,
    written: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl S3Storage {
    /// Connect to the bucket and check that the prefix is unused.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if objects already exist under
    /// the prefix, and [`StorageError::S3`] if the bucket cannot be listed.
    pub fn connect(bucket: String, prefix: String, settings: &S3Settings) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("dzi-s3")
            .build()
            .map_err(|e| StorageError::S3(format!("failed to start runtime: {e}")))?;
        let client = runtime.block_on(settings.client());

        let storage = Self {
            runtime,
            client,
            bucket,
            prefix,
            written: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        };
        storage.ensure_unused_prefix()?;
        debug!(bucket = %storage.bucket, prefix = %storage.prefix, "Connected to S3 destination");
        Ok(storage)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn ensure_unused_prefix(&self) -> Result<(), StorageError> {
        let listing_prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let output = self
            .runtime
            .block_on(
                self.client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(listing_prefix)
                    .max_keys(1)
                    .send(),
            )
            .map_err(|e| StorageError::S3(e.to_string()))?;

        if !output.contents().is_empty() {
            return Err(StorageError::AlreadyExists(format!(
                "s3://{}/{}",
                self.bucket, self.prefix
            )));
        }
        Ok(())
    }

    fn claim(&self, path: &str) -> Result<String, StorageError> {
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
        Ok(object_key(&self.prefix, path))
    }

    fn put(&self, key: &str, body: ByteStream) -> Result<(), StorageError> {
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(body)
                    .send(),
            )
            .map_err(|e| StorageError::S3(format!("s3://{}/{key}: {e}", self.bucket)))?;
        trace!(bucket = %self.bucket, key, "Uploaded entry");
        Ok(())
    }
}

impl StorageSink for S3Storage {
    fn append_entry<T, E, F>(&self, path: &str, producer: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<T, E>,
        E: From<StorageError>,
    {
        let key = self.claim(path)?;
        let mut buffer = Vec::new();
        let result = producer(&mut buffer)?;
        self.put(&key, ByteStream::from(buffer))?;
        Ok(result)
    }

    fn append_file(&self, path: &str, file: &Path) -> Result<(), StorageError> {
        let key = self.claim(path)?;
        let body = self
            .runtime
            .block_on(ByteStream::from_path(file))
            .map_err(|e| StorageError::S3(format!("{}: {e}", file.display())))?;
        self.put(&key, body)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Object key of an entry below `prefix`.
fn object_key(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{prefix}/{path}")
    }
}
