//! Test helpers for integration tests.
//!
//! Provides fault-injecting wrappers around the real stores and a harness
//! wiring them into the services.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tierbox::file::{BlobReader, BlobStore, FileRecord, MemoryBlobStore, NewFileRecord};
use tierbox::ledger::NewAccount;
use tierbox::{
    AccountTierState, Database, ExpirationSweep, FileRecordStore, FileService, PackageService,
    Result, SqlMetadataStore, StorageSnapshot, Tier, TierLedgerStore, TierboxError,
};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateAccount,
    GetTierState,
    SetTier,
    MarkLapsed,
    SetExpiry,
    ClearExpiry,
    ListExpired,
    ListStale,
    GetStorage,
    AdjustUsage,
    InsertFile,
    GetFile,
    ListFiles,
    DeleteFile,
    BlobPut,
    BlobGet,
    BlobDelete,
    BlobExists,
}

#[derive(Debug, Default, Clone)]
struct Fault {
    fail: bool,
    /// Restrict failures to these accounts; `None` fails every call.
    accounts: Option<HashSet<i64>>,
    delay: Option<Duration>,
}

/// Shared fault table.
#[derive(Debug, Default)]
pub struct Faults {
    table: Mutex<HashMap<Op, Fault>>,
}

impl Faults {
    /// Fail every call of `op`.
    pub fn fail(&self, op: Op) {
        let mut table = self.table.lock().unwrap();
        let fault = table.entry(op).or_default();
        fault.fail = true;
        fault.accounts = None;
    }

    /// Fail calls of `op` for one account only.
    pub fn fail_for(&self, op: Op, account_id: i64) {
        let mut table = self.table.lock().unwrap();
        let fault = table.entry(op).or_default();
        fault.fail = true;
        fault
            .accounts
            .get_or_insert_with(HashSet::new)
            .insert(account_id);
    }

    /// Delay every call of `op`.
    pub fn delay(&self, op: Op, delay: Duration) {
        self.table.lock().unwrap().entry(op).or_default().delay = Some(delay);
    }

    /// Remove all faults of `op`.
    pub fn heal(&self, op: Op) {
        self.table.lock().unwrap().remove(&op);
    }

    pub fn heal_all(&self) {
        self.table.lock().unwrap().clear();
    }

    async fn check(&self, op: Op, account_id: Option<i64>) -> Result<()> {
        let fault = self.table.lock().unwrap().get(&op).cloned();
        let Some(fault) = fault else {
            return Ok(());
        };

        if let Some(delay) = fault.delay {
            tokio::time::sleep(delay).await;
        }

        let hit = fault.fail
            && match (&fault.accounts, account_id) {
                (None, _) => true,
                (Some(accounts), Some(id)) => accounts.contains(&id),
                (Some(_), None) => false,
            };
        if hit {
            return Err(TierboxError::UpstreamUnavailable(format!(
                "injected failure: {op:?}"
            )));
        }
        Ok(())
    }
}

/// Metadata store that fails on demand.
pub struct FlakyStore {
    inner: SqlMetadataStore,
    pub faults: Faults,
}

impl FlakyStore {
    pub fn new(inner: SqlMetadataStore) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }

    pub fn inner(&self) -> &SqlMetadataStore {
        &self.inner
    }
}

#[async_trait]
impl TierLedgerStore for FlakyStore {
    async fn create_account(&self, account: &NewAccount) -> Result<()> {
        self.faults
            .check(Op::CreateAccount, Some(account.account_id))
            .await?;
        self.inner.create_account(account).await
    }

    async fn get_tier_state(&self, account_id: i64) -> Result<AccountTierState> {
        self.faults.check(Op::GetTierState, Some(account_id)).await?;
        self.inner.get_tier_state(account_id).await
    }

    async fn set_tier(&self, account_id: i64, tier: Tier) -> Result<()> {
        self.faults.check(Op::SetTier, Some(account_id)).await?;
        self.inner.set_tier(account_id, tier).await
    }

    async fn mark_lapsed(&self, account_id: i64, lapsed_at: DateTime<Utc>) -> Result<()> {
        self.faults.check(Op::MarkLapsed, Some(account_id)).await?;
        self.inner.mark_lapsed(account_id, lapsed_at).await
    }

    async fn set_expiry(&self, account_id: i64, expiry: DateTime<Utc>) -> Result<()> {
        self.faults.check(Op::SetExpiry, Some(account_id)).await?;
        self.inner.set_expiry(account_id, expiry).await
    }

    async fn clear_expiry(&self, account_id: i64) -> Result<()> {
        self.faults.check(Op::ClearExpiry, Some(account_id)).await?;
        self.inner.clear_expiry(account_id).await
    }

    async fn list_expired_premium_accounts(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        self.faults.check(Op::ListExpired, None).await?;
        self.inner.list_expired_premium_accounts(now).await
    }

    async fn list_stale_expiry_accounts(&self) -> Result<Vec<i64>> {
        self.faults.check(Op::ListStale, None).await?;
        self.inner.list_stale_expiry_accounts().await
    }

    async fn get_storage(&self, account_id: i64) -> Result<StorageSnapshot> {
        self.faults.check(Op::GetStorage, Some(account_id)).await?;
        self.inner.get_storage(account_id).await
    }

    async fn adjust_tier_usage(&self, account_id: i64, tier: Tier, delta_bytes: i64) -> Result<()> {
        self.faults.check(Op::AdjustUsage, Some(account_id)).await?;
        self.inner
            .adjust_tier_usage(account_id, tier, delta_bytes)
            .await
    }
}

#[async_trait]
impl FileRecordStore for FlakyStore {
    async fn insert_file(&self, file: &NewFileRecord) -> Result<FileRecord> {
        self.faults.check(Op::InsertFile, Some(file.owner_id)).await?;
        self.inner.insert_file(file).await
    }

    async fn get_file(&self, file_id: i64, owner_id: i64) -> Result<Option<FileRecord>> {
        self.faults.check(Op::GetFile, Some(owner_id)).await?;
        self.inner.get_file(file_id, owner_id).await
    }

    async fn list_files_by_owner(&self, owner_id: i64) -> Result<Vec<FileRecord>> {
        self.faults.check(Op::ListFiles, Some(owner_id)).await?;
        self.inner.list_files_by_owner(owner_id).await
    }

    async fn delete_file(&self, file_id: i64, owner_id: i64) -> Result<bool> {
        self.faults.check(Op::DeleteFile, Some(owner_id)).await?;
        self.inner.delete_file(file_id, owner_id).await
    }
}

/// Blob store that fails on demand.
#[derive(Default)]
pub struct FlakyBlobStore {
    inner: MemoryBlobStore,
    pub faults: Faults,
}

impl FlakyBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryBlobStore {
        &self.inner
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &str, body: BlobReader, size: i64, content_type: &str) -> Result<()> {
        self.faults.check(Op::BlobPut, None).await?;
        self.inner.put(key, body, size, content_type).await
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        self.faults.check(Op::BlobGet, None).await?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.faults.check(Op::BlobDelete, None).await?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.faults.check(Op::BlobExists, None).await?;
        self.inner.exists(key).await
    }
}

/// Services wired to fault-injecting stores.
pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub blobs: Arc<FlakyBlobStore>,
    pub files: FileService,
    pub packages: PackageService,
    pub sweep: ExpirationSweep,
}

impl Harness {
    /// Build a harness over a fresh in-memory database.
    pub async fn new() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let store = Arc::new(FlakyStore::new(SqlMetadataStore::new(db)));
        let blobs = Arc::new(FlakyBlobStore::new());

        Self {
            files: FileService::new(store.clone(), blobs.clone()),
            packages: PackageService::new(store.clone()),
            sweep: ExpirationSweep::new(store.clone()),
            store,
            blobs,
        }
    }

    /// Rebuild the file service, e.g. to change its policy.
    pub fn with_files(mut self, build: impl FnOnce(FileService) -> FileService) -> Self {
        let files = FileService::new(self.store.clone(), self.blobs.clone());
        self.files = build(files);
        self
    }

    pub async fn storage(&self, account_id: i64) -> StorageSnapshot {
        self.store.inner().get_storage(account_id).await.unwrap()
    }

    /// All records of an account, ignoring the visibility filter.
    pub async fn records(&self, account_id: i64) -> Vec<FileRecord> {
        self.store
            .inner()
            .list_files_by_owner(account_id)
            .await
            .unwrap()
    }

    /// Ledger counter of `tier` equals the sum of that tier's file sizes.
    pub async fn assert_ledger_consistent(&self, account_id: i64) {
        let snapshot = self.storage(account_id).await;
        let records = self.records(account_id).await;
        for tier in [Tier::Free, Tier::Premium] {
            let sum: i64 = records
                .iter()
                .filter(|r| r.uploaded_with_tier == tier)
                .map(|r| r.size_bytes)
                .sum();
            assert_eq!(
                snapshot.used(tier),
                sum,
                "{tier} ledger does not match file records"
            );
        }
    }
}
