//! tierbox - tiered-quota file hosting core
//!
//! Accounts hold a free or premium package, each with its own storage
//! ledger. Files keep the tier they were uploaded under, premium expires
//! lazily against wall-clock time, and a periodic sweep persists lapses.

pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod file;
pub mod ledger;
pub mod logging;
pub mod package;
pub mod store;

pub use config::Config;
pub use db::{Database, DbPool};
pub use error::{DenyReason, ErrorKind, Result, TierboxError};
pub use file::{
    BlobReader, BlobStore, Download, FileRecord, FileService, FsBlobStore, LapsedUploadPolicy,
    MemoryBlobStore, UploadRequest,
};
pub use ledger::{AccountTierState, StorageSnapshot};
pub use package::{
    resolve_effective_tier, ExpirationSweep, PackageService, Resolution, SweepReport, Tier,
};
pub use store::{FileRecordStore, MetadataStore, SqlMetadataStore, TierLedgerStore};
