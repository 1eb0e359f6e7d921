//! File record types and repository for tierbox.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::datetime::{parse_db_timestamp, to_db_timestamp};
use crate::db::DbPool;
use crate::package::Tier;
use crate::{Result, TierboxError};

/// Metadata of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Unique file ID.
    pub id: i64,
    /// Owning account.
    pub owner_id: i64,
    /// Name shown to the user; also part of the blob key.
    pub display_name: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// Key of the payload in the blob store.
    pub blob_key: String,
    /// MIME type.
    pub content_type: String,
    /// Effective tier at upload time. Never changes after creation.
    pub uploaded_with_tier: Tier,
    /// When the file was uploaded.
    pub created_at: DateTime<Utc>,
}

/// Data for inserting a new file record.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub owner_id: i64,
    pub display_name: String,
    pub size_bytes: i64,
    pub blob_key: String,
    pub content_type: String,
    pub uploaded_with_tier: Tier,
}

/// Repository for file record operations.
pub struct FileRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FileRepository<'a> {
    /// Create a new FileRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new file record and return it with its assigned ID.
    pub async fn create(&self, file: &NewFileRecord) -> Result<FileRecord> {
        let created_at = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO files (owner_id, display_name, size_bytes, blob_key, content_type, uploaded_with_tier, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(file.owner_id)
        .bind(&file.display_name)
        .bind(file.size_bytes)
        .bind(&file.blob_key)
        .bind(&file.content_type)
        .bind(file.uploaded_with_tier.as_str())
        .bind(to_db_timestamp(&created_at))
        .fetch_one(self.pool)
        .await?;

        self.get_for_owner(id, file.owner_id)
            .await?
            .ok_or_else(|| TierboxError::NotFound("file".to_string()))
    }

    /// Get a file by ID, only if it belongs to `owner_id`.
    pub async fn get_for_owner(&self, id: i64, owner_id: i64) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as(
            "SELECT id, owner_id, display_name, size_bytes, blob_key, content_type, uploaded_with_tier, created_at
             FROM files WHERE id = $1 AND owner_id = $2",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(FileRow::into_record).transpose()
    }

    /// List files owned by an account, newest first.
    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<FileRecord>> {
        let rows: Vec<FileRow> = sqlx::query_as(
            "SELECT id, owner_id, display_name, size_bytes, blob_key, content_type, uploaded_with_tier, created_at
             FROM files WHERE owner_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(FileRow::into_record).collect()
    }

    /// Delete a file owned by `owner_id`. Returns `false` if nothing matched.
    pub async fn delete(&self, id: i64, owner_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Internal struct for mapping database rows to FileRecord.
#[derive(sqlx::FromRow)]
struct FileRow {
    id: i64,
    owner_id: i64,
    display_name: String,
    size_bytes: i64,
    blob_key: String,
    content_type: String,
    uploaded_with_tier: String,
    created_at: String,
}

impl FileRow {
    fn into_record(self) -> Result<FileRecord> {
        // A file whose tag can't be read must not silently become free.
        let uploaded_with_tier = self.uploaded_with_tier.parse().map_err(|e: String| {
            TierboxError::UpstreamUnavailable(format!("file {}: {e}", self.id))
        })?;

        Ok(FileRecord {
            id: self.id,
            owner_id: self.owner_id,
            display_name: self.display_name,
            size_bytes: self.size_bytes,
            blob_key: self.blob_key,
            content_type: self.content_type,
            uploaded_with_tier,
            created_at: parse_db_timestamp(&self.created_at).unwrap_or_default(),
        })
    }
}
