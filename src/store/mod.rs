//! Metadata store contracts for tierbox.
//!
//! The coordinator, resolver and sweep only see these traits. The
//! sqlx-backed [`SqlMetadataStore`] is the production implementation;
//! tests wrap it to inject failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::file::{FileRecord, FileRepository, NewFileRecord};
use crate::ledger::{AccountRepository, AccountTierState, NewAccount, StorageSnapshot};
use crate::package::Tier;
use crate::{Result, TierboxError};

/// Account tier state and per-tier storage ledger.
///
/// Every per-account method fails with `NotFound` for unknown accounts.
#[async_trait]
pub trait TierLedgerStore: Send + Sync {
    /// Provision a new account. Fails with `InvalidInput` if it exists.
    async fn create_account(&self, account: &NewAccount) -> Result<()>;

    /// Read raw tier and expiry.
    async fn get_tier_state(&self, account_id: i64) -> Result<AccountTierState>;

    /// Overwrite the stored tier as an explicit change; drops any lapse marker.
    async fn set_tier(&self, account_id: i64, tier: Tier) -> Result<()>;

    /// Persist a lapse: tier becomes free and `lapsed_at` is recorded.
    async fn mark_lapsed(&self, account_id: i64, lapsed_at: DateTime<Utc>) -> Result<()>;

    /// Schedule premium expiry.
    async fn set_expiry(&self, account_id: i64, expiry: DateTime<Utc>) -> Result<()>;

    /// Clear the expiry. Idempotent.
    async fn clear_expiry(&self, account_id: i64) -> Result<()>;

    /// Accounts with `tier = premium AND tier_expiry < now`.
    async fn list_expired_premium_accounts(&self, now: DateTime<Utc>) -> Result<Vec<i64>>;

    /// Accounts left `tier = free` with an expiry still set.
    async fn list_stale_expiry_accounts(&self) -> Result<Vec<i64>>;

    /// Read the four ledger counters.
    async fn get_storage(&self, account_id: i64) -> Result<StorageSnapshot>;

    /// Add `delta_bytes` to the counter of `tier`.
    async fn adjust_tier_usage(&self, account_id: i64, tier: Tier, delta_bytes: i64)
        -> Result<()>;
}

/// File record CRUD.
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    /// Insert a record and return it with its ID.
    async fn insert_file(&self, file: &NewFileRecord) -> Result<FileRecord>;

    /// Get a file only if it belongs to `owner_id`.
    async fn get_file(&self, file_id: i64, owner_id: i64) -> Result<Option<FileRecord>>;

    /// All files owned by an account.
    async fn list_files_by_owner(&self, owner_id: i64) -> Result<Vec<FileRecord>>;

    /// Delete a file owned by `owner_id`. Returns `false` if nothing matched.
    async fn delete_file(&self, file_id: i64, owner_id: i64) -> Result<bool>;
}

/// Combined metadata/ledger store.
pub trait MetadataStore: TierLedgerStore + FileRecordStore {}

impl<T: TierLedgerStore + FileRecordStore + ?Sized> MetadataStore for T {}

fn account_not_found(account_id: i64) -> TierboxError {
    TierboxError::NotFound(format!("account {account_id}"))
}

/// Metadata store backed by the sqlx pool.
#[derive(Debug, Clone)]
pub struct SqlMetadataStore {
    db: Database,
}

impl SqlMetadataStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn accounts(&self) -> AccountRepository<'_> {
        AccountRepository::new(self.db.pool())
    }

    fn files(&self) -> FileRepository<'_> {
        FileRepository::new(self.db.pool())
    }
}

#[async_trait]
impl TierLedgerStore for SqlMetadataStore {
    async fn create_account(&self, account: &NewAccount) -> Result<()> {
        if self.accounts().create(account).await? {
            Ok(())
        } else {
            Err(TierboxError::InvalidInput(format!(
                "account {} already exists",
                account.account_id
            )))
        }
    }

    async fn get_tier_state(&self, account_id: i64) -> Result<AccountTierState> {
        self.accounts()
            .get_tier_state(account_id)
            .await?
            .ok_or_else(|| account_not_found(account_id))
    }

    async fn set_tier(&self, account_id: i64, tier: Tier) -> Result<()> {
        if self.accounts().set_tier(account_id, tier).await? {
            Ok(())
        } else {
            Err(account_not_found(account_id))
        }
    }

    async fn mark_lapsed(&self, account_id: i64, lapsed_at: DateTime<Utc>) -> Result<()> {
        if self.accounts().mark_lapsed(account_id, lapsed_at).await? {
            Ok(())
        } else {
            Err(account_not_found(account_id))
        }
    }

    async fn set_expiry(&self, account_id: i64, expiry: DateTime<Utc>) -> Result<()> {
        if self.accounts().set_expiry(account_id, expiry).await? {
            Ok(())
        } else {
            Err(account_not_found(account_id))
        }
    }

    async fn clear_expiry(&self, account_id: i64) -> Result<()> {
        if self.accounts().clear_expiry(account_id).await? {
            Ok(())
        } else {
            Err(account_not_found(account_id))
        }
    }

    async fn list_expired_premium_accounts(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        self.accounts().list_expired_premium(now).await
    }

    async fn list_stale_expiry_accounts(&self) -> Result<Vec<i64>> {
        self.accounts().list_stale_expiry().await
    }

    async fn get_storage(&self, account_id: i64) -> Result<StorageSnapshot> {
        self.accounts()
            .get_storage(account_id)
            .await?
            .ok_or_else(|| account_not_found(account_id))
    }

    async fn adjust_tier_usage(
        &self,
        account_id: i64,
        tier: Tier,
        delta_bytes: i64,
    ) -> Result<()> {
        if self
            .accounts()
            .adjust_usage(account_id, tier, delta_bytes)
            .await?
        {
            Ok(())
        } else {
            Err(account_not_found(account_id))
        }
    }
}

#[async_trait]
impl FileRecordStore for SqlMetadataStore {
    async fn insert_file(&self, file: &NewFileRecord) -> Result<FileRecord> {
        self.files().create(file).await
    }

    async fn get_file(&self, file_id: i64, owner_id: i64) -> Result<Option<FileRecord>> {
        self.files().get_for_owner(file_id, owner_id).await
    }

    async fn list_files_by_owner(&self, owner_id: i64) -> Result<Vec<FileRecord>> {
        self.files().list_by_owner(owner_id).await
    }

    async fn delete_file(&self, file_id: i64, owner_id: i64) -> Result<bool> {
        self.files().delete(file_id, owner_id).await
    }
}
