//! Blob store implementations for tierbox.
//!
//! - [`FsBlobStore`]: payloads on the local filesystem
//! - [`MemoryBlobStore`]: payloads in process memory (tests, ephemeral runs)

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::blob::{reader_from_bytes, BlobReader, BlobStore};
use crate::{Result, TierboxError};

fn upstream(op: &str, key: &str, e: io::Error) -> TierboxError {
    TierboxError::UpstreamUnavailable(format!("blob store {op} {key:?}: {e}"))
}

fn size_mismatch(key: &str, declared: i64, received: u64) -> TierboxError {
    TierboxError::InvalidInput(format!(
        "payload for {key:?} does not match declared size: declared {declared} bytes, received {received}"
    ))
}

/// Filesystem-backed blob store.
///
/// Keys map to paths below the base directory:
/// ```text
/// {base_path}/
/// ├── 1/
/// │   └── notes.txt
/// └── 2/
///     └── photo.png
/// ```
/// Writes land in a uuid-named temporary file that is renamed into place,
/// so a failed upload never leaves a truncated object under its key. The
/// temporary file is removed when the write fails or is abandoned.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    /// Base directory for blob storage.
    base_path: PathBuf,
}

impl FsBlobStore {
    /// Create a new FsBlobStore with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this store.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a key to its path, rejecting keys that escape the base path.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !well_formed {
            return Err(TierboxError::InvalidInput(format!("invalid blob key {key:?}")));
        }

        Ok(self.base_path.join(relative))
    }

    /// Reap partial writes older than `stale_after` and remove empty
    /// account directories.
    ///
    /// Partial writes younger than `stale_after` may belong to an upload
    /// still in flight and are left alone.
    pub async fn cleanup(&self, stale_after: Duration) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let mut remaining = 0;
            let mut inner = fs::read_dir(&path).await?;
            while let Some(file) = inner.next_entry().await? {
                if is_partial(&file.path()) && is_older_than(&file, stale_after).await {
                    match fs::remove_file(file.path()).await {
                        Ok(()) => {
                            report.partial_files += 1;
                            continue;
                        }
                        Err(e) => warn!(path = ?file.path(), error = %e, "failed to reap partial blob"),
                    }
                }
                remaining += 1;
            }

            if remaining == 0 && fs::remove_dir(&path).await.is_ok() {
                report.empty_dirs += 1;
            }
        }

        if report.partial_files > 0 || report.empty_dirs > 0 {
            debug!(
                partial_files = report.partial_files,
                empty_dirs = report.empty_dirs,
                "blob storage cleaned up"
            );
        }
        Ok(report)
    }
}

/// What [`FsBlobStore::cleanup`] removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub partial_files: usize,
    pub empty_dirs: usize,
}

const PARTIAL_SUFFIX: &str = ".part";

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX))
}

async fn is_older_than(entry: &fs::DirEntry, age: Duration) -> bool {
    match entry.metadata().await.and_then(|m| m.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|elapsed| elapsed >= age),
        Err(_) => false,
    }
}

/// Temporary file removed on drop unless it was renamed into place.
///
/// Dropping the put future (a timeout, a cancelled request) runs this too,
/// so no partial write outlives its request.
struct PartialFile {
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!(".{}{PARTIAL_SUFFIX}", Uuid::new_v4())),
            persisted: false,
        }
    }

    async fn persist(mut self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?self.path, error = %e, "failed to remove partial blob");
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, body: BlobReader, size: i64, _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| TierboxError::InvalidInput(format!("invalid blob key {key:?}")))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| upstream("put", key, e))?;

        let partial = PartialFile::new(parent);
        let declared = size.max(0) as u64;

        let written = async {
            let mut file = fs::File::create(&partial.path).await?;
            // Read one byte past the declared size to detect oversized payloads.
            let mut limited = body.take(declared + 1);
            let written = tokio::io::copy(&mut limited, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, io::Error>(written)
        }
        .await;

        match written {
            Ok(n) if n == declared => partial
                .persist(&path)
                .await
                .map_err(|e| upstream("put", key, e))?,
            Ok(n) => return Err(size_mismatch(key, size, n)),
            Err(e) => return Err(upstream("put", key, e)),
        }

        debug!(key, size, "blob stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        let path = self.path_for(key)?;

        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TierboxError::NotFound(format!("blob {key}")))
            }
            Err(e) => Err(upstream("get", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(upstream("delete", key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| upstream("stat", key, e))
    }
}

#[derive(Debug, Clone)]
struct MemoryBlob {
    data: Vec<u8>,
    content_type: String,
}

/// In-process blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, MemoryBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Content type recorded for `key`.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|b| b.content_type.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryBlob>> {
        // A panic while holding the lock can't leave a map entry half-written.
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, body: BlobReader, size: i64, content_type: &str) -> Result<()> {
        let declared = size.max(0) as u64;
        let mut data = Vec::with_capacity(declared as usize);
        body.take(declared + 1)
            .read_to_end(&mut data)
            .await
            .map_err(|e| upstream("put", key, e))?;

        if data.len() as u64 != declared {
            return Err(size_mismatch(key, size, data.len() as u64));
        }

        self.lock().insert(
            key.to_string(),
            MemoryBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        let data = self
            .lock()
            .get(key)
            .map(|b| b.data.clone())
            .ok_or_else(|| TierboxError::NotFound(format!("blob {key}")))?;
        Ok(reader_from_bytes(data))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock().contains_key(key))
    }
}
