//! Account repository for tierbox.
//!
//! This module provides tier-state and ledger operations on the `accounts` table.

use chrono::{DateTime, Utc};

use super::types::{AccountTierState, NewAccount, StorageSnapshot};
use crate::datetime::{parse_db_timestamp, to_db_timestamp};
use crate::db::DbPool;
use crate::package::Tier;
use crate::{Result, TierboxError};

/// Repository for account tier state and storage ledger.
pub struct AccountRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> AccountRepository<'a> {
    /// Create a new AccountRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new account: tier free, no expiry, both counters at zero.
    ///
    /// Returns `false` if the account already exists.
    pub async fn create(&self, account: &NewAccount) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO accounts (id, tier, tier_expiry, free_used, free_limit, premium_used, premium_limit, created_at)
             VALUES ($1, $2, NULL, 0, $3, 0, $4, $5)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(account.account_id)
        .bind(Tier::Free.as_str())
        .bind(account.free_limit)
        .bind(account.premium_limit)
        .bind(to_db_timestamp(&Utc::now()))
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the raw tier state of an account.
    pub async fn get_tier_state(&self, account_id: i64) -> Result<Option<AccountTierState>> {
        let row: Option<TierRow> =
            sqlx::query_as("SELECT id, tier, tier_expiry, lapsed_at FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(self.pool)
                .await?;

        row.map(TierRow::into_state).transpose()
    }

    /// Set the stored tier as an explicit tier change, dropping any lapse marker.
    ///
    /// Returns `false` if the account doesn't exist.
    pub async fn set_tier(&self, account_id: i64, tier: Tier) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET tier = $1, lapsed_at = NULL WHERE id = $2")
            .bind(tier.as_str())
            .bind(account_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist a premium lapse: tier becomes free and the lapse is recorded.
    ///
    /// Returns `false` if the account doesn't exist.
    pub async fn mark_lapsed(&self, account_id: i64, lapsed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET tier = $1, lapsed_at = $2 WHERE id = $3")
            .bind(Tier::Free.as_str())
            .bind(to_db_timestamp(&lapsed_at))
            .bind(account_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Schedule a premium expiry. Returns `false` if the account doesn't exist.
    pub async fn set_expiry(&self, account_id: i64, expiry: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET tier_expiry = $1 WHERE id = $2")
            .bind(to_db_timestamp(&expiry))
            .bind(account_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear the scheduled expiry. Clearing an already-empty expiry is a no-op.
    ///
    /// Returns `false` if the account doesn't exist.
    pub async fn clear_expiry(&self, account_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET tier_expiry = NULL WHERE id = $1")
            .bind(account_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List premium accounts whose expiry is strictly before `now`.
    pub async fn list_expired_premium(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM accounts
             WHERE tier = $1 AND tier_expiry IS NOT NULL AND tier_expiry < $2
             ORDER BY id",
        )
        .bind(Tier::Premium.as_str())
        .bind(to_db_timestamp(&now))
        .fetch_all(self.pool)
        .await?;

        Ok(ids)
    }

    /// List free accounts that still carry an expiry timestamp.
    pub async fn list_stale_expiry(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM accounts WHERE tier = $1 AND tier_expiry IS NOT NULL ORDER BY id",
        )
        .bind(Tier::Free.as_str())
        .fetch_all(self.pool)
        .await?;

        Ok(ids)
    }

    /// Get the four ledger counters of an account.
    pub async fn get_storage(&self, account_id: i64) -> Result<Option<StorageSnapshot>> {
        let row: Option<(i64, i64, i64, i64)> = sqlx::query_as(
            "SELECT free_used, free_limit, premium_used, premium_limit FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(
            |(free_used, free_limit, premium_used, premium_limit)| StorageSnapshot {
                free_used,
                free_limit,
                premium_used,
                premium_limit,
            },
        ))
    }

    /// Add `delta` bytes (negative to release) to the counter of `tier`.
    ///
    /// Returns `false` if the account doesn't exist.
    pub async fn adjust_usage(&self, account_id: i64, tier: Tier, delta: i64) -> Result<bool> {
        let sql = match tier {
            Tier::Free => "UPDATE accounts SET free_used = free_used + $1 WHERE id = $2",
            Tier::Premium => "UPDATE accounts SET premium_used = premium_used + $1 WHERE id = $2",
        };

        let result = sqlx::query(sql)
            .bind(delta)
            .bind(account_id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Internal struct for mapping database rows to AccountTierState.
#[derive(sqlx::FromRow)]
struct TierRow {
    id: i64,
    tier: String,
    tier_expiry: Option<String>,
    lapsed_at: Option<String>,
}

impl TierRow {
    fn into_state(self) -> Result<AccountTierState> {
        let id = self.id;
        let parse = |column: &str, raw: Option<String>| -> Result<Option<DateTime<Utc>>> {
            match raw {
                Some(raw) => parse_db_timestamp(&raw).map(Some).ok_or_else(|| {
                    TierboxError::UpstreamUnavailable(format!(
                        "account {id} has unreadable {column} {raw:?}"
                    ))
                }),
                None => Ok(None),
            }
        };

        Ok(AccountTierState {
            account_id: self.id,
            tier: self.tier.parse::<Tier>().map_err(|e: String| {
                TierboxError::UpstreamUnavailable(format!("account {id} has unreadable tier: {e}"))
            })?,
            tier_expiry: parse("tier_expiry", self.tier_expiry)?,
            lapsed_at: parse("lapsed_at", self.lapsed_at)?,
        })
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::ledger::{DEFAULT_FREE_LIMIT, DEFAULT_PREMIUM_LIMIT};
    use crate::Database;
    use chrono::{Duration, SubsecRound};

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_account_defaults() {
        let db = setup_db().await;
        let repo = AccountRepository::new(db.pool());

        assert!(repo.create(&NewAccount::new(1)).await.unwrap());

        let state = repo.get_tier_state(1).await.unwrap().unwrap();
        assert_eq!(state.tier, Tier::Free);
        assert!(state.tier_expiry.is_none());

        let storage = repo.get_storage(1).await.unwrap().unwrap();
        assert_eq!(storage.free_used, 0);
        assert_eq!(storage.free_limit, DEFAULT_FREE_LIMIT);
        assert_eq!(storage.premium_used, 0);
        assert_eq!(storage.premium_limit, DEFAULT_PREMIUM_LIMIT);
    }

    #[tokio::test]
    async fn test_create_duplicate_account() {
        let db = setup_db().await;
        let repo = AccountRepository::new(db.pool());

        assert!(repo.create(&NewAccount::new(1)).await.unwrap());
        assert!(!repo.create(&NewAccount::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_account() {
        let db = setup_db().await;
        let repo = AccountRepository::new(db.pool());

        assert!(repo.get_tier_state(404).await.unwrap().is_none());
        assert!(repo.get_storage(404).await.unwrap().is_none());
        assert!(!repo.set_tier(404, Tier::Premium).await.unwrap());
        assert!(!repo.adjust_usage(404, Tier::Free, 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_tier_is_an_error() {
        let db = setup_db().await;
        let repo = AccountRepository::new(db.pool());
        repo.create(&NewAccount::new(1)).await.unwrap();

        sqlx::query("UPDATE accounts SET tier = 'gold' WHERE id = 1")
            .execute(db.pool())
            .await
            .unwrap();

        let err = repo.get_tier_state(1).await.unwrap_err();
        assert!(matches!(err, TierboxError::UpstreamUnavailable(_)));
        assert!(err.to_string().contains("gold"));
    }

    #[tokio::test]
    async fn test_set_and_clear_expiry() {
        let db = setup_db().await;
        let repo = AccountRepository::new(db.pool());
        repo.create(&NewAccount::new(1)).await.unwrap();

        // Stored with microsecond precision
        let expiry = (Utc::now() + Duration::minutes(2)).trunc_subsecs(6);
        repo.set_tier(1, Tier::Premium).await.unwrap();
        repo.set_expiry(1, expiry).await.unwrap();

        let state = repo.get_tier_state(1).await.unwrap().unwrap();
        assert_eq!(state.tier, Tier::Premium);
        assert_eq!(state.tier_expiry, Some(expiry));

        assert!(repo.clear_expiry(1).await.unwrap());
        // Clearing twice is a no-op
        assert!(repo.clear_expiry(1).await.unwrap());

        let state = repo.get_tier_state(1).await.unwrap().unwrap();
        assert!(state.tier_expiry.is_none());
    }

    #[tokio::test]
    async fn test_mark_lapsed_then_explicit_tier_change() {
        let db = setup_db().await;
        let repo = AccountRepository::new(db.pool());
        repo.create(&NewAccount::new(1)).await.unwrap();
        repo.set_tier(1, Tier::Premium).await.unwrap();

        let at = Utc::now().trunc_subsecs(6);
        assert!(repo.mark_lapsed(1, at).await.unwrap());

        let state = repo.get_tier_state(1).await.unwrap().unwrap();
        assert_eq!(state.tier, Tier::Free);
        assert_eq!(state.lapsed_at, Some(at));

        repo.set_tier(1, Tier::Premium).await.unwrap();
        let state = repo.get_tier_state(1).await.unwrap().unwrap();
        assert_eq!(state.tier, Tier::Premium);
        assert!(state.lapsed_at.is_none());
    }

    #[tokio::test]
    async fn test_list_expired_premium() {
        let db = setup_db().await;
        let repo = AccountRepository::new(db.pool());
        let now = Utc::now();

        for id in 1..=4 {
            repo.create(&NewAccount::new(id)).await.unwrap();
        }
        // 1: premium, lapsed
        repo.set_tier(1, Tier::Premium).await.unwrap();
        repo.set_expiry(1, now - Duration::minutes(1)).await.unwrap();
        // 2: premium, still valid
        repo.set_tier(2, Tier::Premium).await.unwrap();
        repo.set_expiry(2, now + Duration::minutes(1)).await.unwrap();
        // 3: permanent premium
        repo.set_tier(3, Tier::Premium).await.unwrap();
        // 4: free with stale expiry
        repo.set_expiry(4, now - Duration::minutes(1)).await.unwrap();

        assert_eq!(repo.list_expired_premium(now).await.unwrap(), vec![1]);
        assert_eq!(repo.list_stale_expiry().await.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_adjust_usage_targets_one_tier() {
        let db = setup_db().await;
        let repo = AccountRepository::new(db.pool());
        repo.create(&NewAccount::new(1)).await.unwrap();

        repo.adjust_usage(1, Tier::Premium, 1000).await.unwrap();
        repo.adjust_usage(1, Tier::Free, 300).await.unwrap();
        repo.adjust_usage(1, Tier::Premium, -400).await.unwrap();

        let storage = repo.get_storage(1).await.unwrap().unwrap();
        assert_eq!(storage.free_used, 300);
        assert_eq!(storage.premium_used, 600);
    }
}
