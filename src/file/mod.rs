//! File lifecycle for tierbox.
//!
//! This module provides:
//! - File records tagged with the tier they were uploaded under
//! - Blob storage (filesystem and in-memory)
//! - The access policy for premium-tagged files
//! - The upload/download/delete coordinator with ledger compensation

mod blob;
mod locks;
mod metadata;
mod policy;
mod service;
mod storage;

use serde::Deserialize;

pub use blob::{blob_key, reader_from_bytes, BlobReader, BlobStore};
pub use locks::AccountLocks;
pub use metadata::{FileRecord, FileRepository, NewFileRecord};
pub use policy::{evaluate, evaluate_resolution, is_visible, AccessDecision};
pub use service::{validate_display_name, Download, FileService, UploadRequest};
pub use storage::{CleanupReport, FsBlobStore, MemoryBlobStore};

/// Maximum size of a single file (5 MiB).
pub const MAX_FILE_SIZE: i64 = 5 * 1024 * 1024;

/// Maximum length for a display name (in characters).
pub const MAX_DISPLAY_NAME_LENGTH: usize = 255;

/// Content type used when none is given and none can be guessed.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// What an upload does when the account's premium period has lapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LapsedUploadPolicy {
    /// Reject with `PackageExpired` until the account changes tier.
    #[default]
    Block,
    /// Accept under free-tier quota and tag the file free.
    AllowAsFree,
}
