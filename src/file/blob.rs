//! Blob store contract.
//!
//! Payloads are addressed by opaque string keys. The file coordinator is
//! the only producer of keys (see [`blob_key`]).

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::Result;

/// Pass-through payload stream.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Wrap an in-memory payload as a [`BlobReader`].
pub fn reader_from_bytes(bytes: impl Into<Vec<u8>>) -> BlobReader {
    Box::pin(std::io::Cursor::new(bytes.into()))
}

/// Key of an account's file: `"{account_id}/{display_name}"`.
///
/// The same display name maps to the same key, so re-uploading a name
/// overwrites the earlier payload.
pub fn blob_key(account_id: i64, display_name: &str) -> String {
    format!("{account_id}/{display_name}")
}

/// Object storage for file payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store exactly `size` bytes read from `body` under `key`.
    async fn put(&self, key: &str, body: BlobReader, size: i64, content_type: &str) -> Result<()>;

    /// Open a read stream for `key`.
    async fn get(&self, key: &str) -> Result<BlobReader>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether `key` is present.
    async fn exists(&self, key: &str) -> Result<bool>;
}
