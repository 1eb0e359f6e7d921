//! File service for tierbox.
//!
//! This module coordinates the blob store and the metadata store, which
//! cannot be updated atomically together:
//! - Upload with quota checks and compensation on partial failure
//! - Download with the premium access policy and pass-through streaming
//! - Deletion with ledger accounting against the upload-time tier
//! - Listing and storage snapshots

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::blob::{blob_key, reader_from_bytes, BlobReader, BlobStore};
use super::locks::AccountLocks;
use super::metadata::{FileRecord, NewFileRecord};
use super::policy::{evaluate_resolution, is_visible, AccessDecision};
use super::{LapsedUploadPolicy, DEFAULT_CONTENT_TYPE, MAX_DISPLAY_NAME_LENGTH, MAX_FILE_SIZE};
use crate::ledger::StorageSnapshot;
use crate::package::{resolver, Resolution, Tier};
use crate::store::MetadataStore;
use crate::{Result, TierboxError};

/// Request data for file upload.
pub struct UploadRequest {
    /// Name shown to the user.
    pub display_name: String,
    /// MIME type; guessed from the display name when `None`.
    pub content_type: Option<String>,
    /// Declared payload size in bytes.
    pub size: i64,
    /// Payload stream.
    pub body: BlobReader,
}

impl UploadRequest {
    /// Create a new upload request.
    pub fn new(display_name: impl Into<String>, size: i64, body: BlobReader) -> Self {
        Self {
            display_name: display_name.into(),
            content_type: None,
            size,
            body,
        }
    }

    /// Upload request for an in-memory payload.
    pub fn from_bytes(display_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let size = content.len() as i64;
        Self::new(display_name, size, reader_from_bytes(content))
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn resolved_content_type(&self) -> String {
        match &self.content_type {
            Some(ct) if !ct.trim().is_empty() => ct.clone(),
            _ => mime_guess::from_path(&self.display_name)
                .first_raw()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
        }
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("display_name", &self.display_name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Result of a file download.
pub struct Download {
    /// File record.
    pub record: FileRecord,
    /// Payload stream straight from the blob store.
    pub reader: BlobReader,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Check that a display name is usable as the last segment of a blob key.
pub fn validate_display_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TierboxError::InvalidInput(
            "display name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(TierboxError::InvalidInput(format!(
            "display name must be at most {MAX_DISPLAY_NAME_LENGTH} characters"
        )));
    }
    if name.contains(['/', '\\', '\0']) || name.contains("..") {
        return Err(TierboxError::InvalidInput(format!(
            "display name {name:?} contains a path separator or '..'"
        )));
    }
    Ok(())
}

/// Coordinates uploads, downloads and deletes across both stores.
pub struct FileService {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    locks: AccountLocks,
    max_file_size: i64,
    lapsed_upload_policy: LapsedUploadPolicy,
    call_timeout: Option<Duration>,
}

impl FileService {
    /// Create a new FileService with default limits and no call timeout.
    pub fn new(store: Arc<dyn MetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            locks: AccountLocks::new(),
            max_file_size: MAX_FILE_SIZE,
            lapsed_upload_policy: LapsedUploadPolicy::default(),
            call_timeout: None,
        }
    }

    /// Set the maximum single-file size.
    pub fn with_max_file_size(mut self, max_size: i64) -> Self {
        self.max_file_size = max_size;
        self
    }

    /// Set what uploads do for lapsed accounts.
    pub fn with_lapsed_upload_policy(mut self, policy: LapsedUploadPolicy) -> Self {
        self.lapsed_upload_policy = policy;
        self
    }

    /// Bound every store call. `None` disables the bound.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn max_file_size(&self) -> i64 {
        self.max_file_size
    }

    pub fn lapsed_upload_policy(&self) -> LapsedUploadPolicy {
        self.lapsed_upload_policy
    }

    /// Run one store call under the configured timeout.
    async fn call<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                TierboxError::UpstreamUnavailable(format!("{what} timed out after {limit:?}"))
            })?,
            None => fut.await,
        }
    }

    async fn resolve(&self, account_id: i64, now: DateTime<Utc>) -> Result<Resolution> {
        self.call(
            "tier lookup",
            resolver::resolve(self.store.as_ref(), account_id, now),
        )
        .await
    }

    async fn load_record(&self, account_id: i64, file_id: i64) -> Result<FileRecord> {
        self.call("file lookup", self.store.get_file(file_id, account_id))
            .await?
            .ok_or_else(|| TierboxError::NotFound(format!("file {file_id}")))
    }

    fn check_access(record: &FileRecord, resolution: &Resolution) -> Result<()> {
        match evaluate_resolution(record.uploaded_with_tier, resolution) {
            AccessDecision::Permit => Ok(()),
            AccessDecision::Deny(reason) => {
                debug!(
                    file_id = record.id,
                    account_id = record.owner_id,
                    reason = ?reason,
                    "access to premium file denied"
                );
                Err(TierboxError::AccessDenied(reason))
            }
        }
    }

    /// Upload a file.
    ///
    /// # Steps
    /// 1. Resolve the effective tier (lapsed accounts follow the upload policy)
    /// 2. Check the ledger of that tier
    /// 3. Store the payload
    /// 4. Insert the file record tagged with the effective tier
    /// 5. Increment the ledger
    ///
    /// Later failures undo earlier steps; undo failures are logged only.
    pub async fn upload(
        &self,
        account_id: i64,
        request: UploadRequest,
        now: DateTime<Utc>,
    ) -> Result<FileRecord> {
        let size = request.size;
        if size <= 0 {
            return Err(TierboxError::InvalidInput(format!(
                "file size must be positive, got {size}"
            )));
        }
        if size > self.max_file_size {
            return Err(TierboxError::InvalidInput(format!(
                "file size {size} bytes exceeds the maximum of {} bytes",
                self.max_file_size
            )));
        }
        validate_display_name(&request.display_name)?;

        let _guard = self.locks.acquire(account_id).await;

        let resolution = self.resolve(account_id, now).await?;
        let tier = match (resolution.is_lapsed(), self.lapsed_upload_policy) {
            (false, _) => resolution.tier,
            (true, LapsedUploadPolicy::Block) => {
                info!(account_id, "upload blocked: premium package expired");
                return Err(TierboxError::PackageExpired);
            }
            (true, LapsedUploadPolicy::AllowAsFree) => Tier::Free,
        };

        let snapshot = self
            .call("ledger lookup", self.store.get_storage(account_id))
            .await?;
        if !snapshot.fits(tier, size) {
            return Err(TierboxError::QuotaExceeded {
                available: snapshot.available(tier),
                requested: size,
            });
        }

        let key = blob_key(account_id, &request.display_name);
        let content_type = request.resolved_content_type();
        self.call(
            "blob put",
            self.blobs.put(&key, request.body, size, &content_type),
        )
        .await?;

        let new_file = NewFileRecord {
            owner_id: account_id,
            display_name: request.display_name,
            size_bytes: size,
            blob_key: key.clone(),
            content_type,
            uploaded_with_tier: tier,
        };
        let record = match self.call("file insert", self.store.insert_file(&new_file)).await {
            Ok(record) => record,
            Err(e) => {
                self.discard_blob(&key).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .call(
                "ledger increment",
                self.store.adjust_tier_usage(account_id, tier, size),
            )
            .await
        {
            self.discard_blob(&key).await;
            self.discard_record(&record).await;
            return Err(e);
        }

        info!(
            account_id,
            file_id = record.id,
            tier = %tier,
            size,
            "file uploaded"
        );
        Ok(record)
    }

    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.call("blob delete", self.blobs.delete(key)).await {
            warn!(key, error = %e, "compensation failed: blob left orphaned");
        }
    }

    async fn discard_record(&self, record: &FileRecord) {
        let outcome = self
            .call(
                "file delete",
                self.store.delete_file(record.id, record.owner_id),
            )
            .await;
        if let Err(e) = outcome {
            warn!(
                file_id = record.id,
                account_id = record.owner_id,
                error = %e,
                "compensation failed: file record left behind"
            );
        }
    }

    /// Download a file owned by `account_id`.
    ///
    /// The payload is streamed from the blob store, never buffered here.
    pub async fn download(
        &self,
        account_id: i64,
        file_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Download> {
        let resolution = self.resolve(account_id, now).await?;
        let record = self.load_record(account_id, file_id).await?;
        Self::check_access(&record, &resolution)?;

        let reader = self
            .call("blob get", self.blobs.get(&record.blob_key))
            .await
            .map_err(|e| match e {
                TierboxError::UpstreamUnavailable(_) => e,
                other => TierboxError::UpstreamUnavailable(format!(
                    "blob {} unreadable: {other}",
                    record.blob_key
                )),
            })?;

        Ok(Download { record, reader })
    }

    /// Delete a file owned by `account_id`.
    ///
    /// The blob goes first; if that fails nothing else is touched. The
    /// ledger is decremented on the file's upload-time tier.
    pub async fn delete(&self, account_id: i64, file_id: i64, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.locks.acquire(account_id).await;

        let resolution = self.resolve(account_id, now).await?;
        let record = self.load_record(account_id, file_id).await?;
        Self::check_access(&record, &resolution)?;

        self.call("blob delete", self.blobs.delete(&record.blob_key))
            .await
            .map_err(|e| match e {
                TierboxError::UpstreamUnavailable(_) => e,
                other => TierboxError::UpstreamUnavailable(format!(
                    "blob {} not removed: {other}",
                    record.blob_key
                )),
            })?;

        if !self
            .call("file delete", self.store.delete_file(record.id, account_id))
            .await?
        {
            return Err(TierboxError::NotFound(format!("file {file_id}")));
        }

        let tier = record.uploaded_with_tier;
        let size = record.size_bytes;
        if let Err(e) = self
            .call(
                "ledger decrement",
                self.store.adjust_tier_usage(account_id, tier, -size),
            )
            .await
        {
            error!(
                file_id,
                account_id,
                tier = %tier,
                size,
                error = %e,
                "CRITICAL: file and blob deleted but ledger not decremented; manual reconciliation needed"
            );
            return Err(TierboxError::CriticalInconsistency {
                file_id,
                account_id,
                tier,
                size,
                detail: e.to_string(),
            });
        }

        info!(account_id, file_id, tier = %tier, size, "file deleted");
        Ok(())
    }

    /// Files of an account visible under its effective tier.
    ///
    /// Premium-tagged files are hidden, not removed, while the account is
    /// not premium.
    pub async fn list_files(&self, account_id: i64, now: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        let resolution = self.resolve(account_id, now).await?;
        let files = self
            .call("file listing", self.store.list_files_by_owner(account_id))
            .await?;

        Ok(files
            .into_iter()
            .filter(|f| is_visible(f.uploaded_with_tier, &resolution))
            .collect())
    }

    /// Raw per-tier usage and limits, whatever the effective tier.
    pub async fn storage_snapshot(
        &self,
        account_id: i64,
        now: DateTime<Utc>,
    ) -> Result<StorageSnapshot> {
        self.resolve(account_id, now).await?;
        self.call("ledger lookup", self.store.get_storage(account_id))
            .await
    }
}
