//! Account provisioning and tier changes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::resolver::{self, Resolution};
use super::{Tier, DEFAULT_PREMIUM_DURATION_SECS};
use crate::ledger::{AccountTierState, NewAccount, DEFAULT_FREE_LIMIT, DEFAULT_PREMIUM_LIMIT};
use crate::store::MetadataStore;
use crate::{Result, TierboxError};

/// Package operations on accounts.
pub struct PackageService {
    store: Arc<dyn MetadataStore>,
    free_limit: i64,
    premium_limit: i64,
    premium_duration: Option<Duration>,
}

impl PackageService {
    /// Create a new PackageService with the default limits and premium period.
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            free_limit: DEFAULT_FREE_LIMIT,
            premium_limit: DEFAULT_PREMIUM_LIMIT,
            premium_duration: Some(Duration::seconds(DEFAULT_PREMIUM_DURATION_SECS as i64)),
        }
    }

    /// Set the limits given to newly opened accounts.
    pub fn with_limits(mut self, free_limit: i64, premium_limit: i64) -> Self {
        self.free_limit = free_limit;
        self.premium_limit = premium_limit;
        self
    }

    /// Set how long an upgrade to premium lasts. `None` makes premium permanent.
    pub fn with_premium_duration(mut self, duration: Option<Duration>) -> Self {
        self.premium_duration = duration;
        self
    }

    /// Provision an account: free tier, no expiry, nothing used.
    pub async fn open_account(&self, account_id: i64) -> Result<()> {
        let account =
            NewAccount::new(account_id).with_limits(self.free_limit, self.premium_limit);
        self.store.create_account(&account).await?;

        info!(account_id, "account opened");
        Ok(())
    }

    /// Effective tier of an account at `now`.
    pub async fn effective_tier(&self, account_id: i64, now: DateTime<Utc>) -> Result<Resolution> {
        resolver::resolve(self.store.as_ref(), account_id, now).await
    }

    /// Move an account to `tier`.
    ///
    /// Premium gets an expiry of `now` plus the premium period (none when
    /// permanent). Free drops any expiry. Either way a persisted lapse is
    /// forgotten.
    pub async fn change_tier(
        &self,
        account_id: i64,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<AccountTierState> {
        // Expiry is written before the tier on upgrade: a failure in between
        // leaves a free row with a stale expiry, which the sweep clears. The
        // reverse order would leave premium without an expiry.
        match (tier, self.premium_duration) {
            (Tier::Premium, Some(duration)) => {
                let expiry = expiry_after(now, duration)?;
                self.store.set_expiry(account_id, expiry).await?;
                self.store.set_tier(account_id, tier).await?;
            }
            (Tier::Premium, None) => {
                self.store.clear_expiry(account_id).await?;
                self.store.set_tier(account_id, tier).await?;
            }
            (Tier::Free, _) => {
                self.store.set_tier(account_id, tier).await?;
                self.store.clear_expiry(account_id).await?;
            }
        }

        let state = self.store.get_tier_state(account_id).await?;
        info!(
            account_id,
            tier = %tier,
            expiry = ?state.tier_expiry,
            "tier changed"
        );
        Ok(state)
    }

    /// Schedule the end of the premium period `duration` from `now`.
    ///
    /// Only premium accounts can be scheduled.
    pub async fn schedule_expiration(
        &self,
        account_id: i64,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        if duration <= Duration::zero() {
            return Err(TierboxError::InvalidInput(format!(
                "expiration must be in the future, got {duration}"
            )));
        }

        // Free accounts never carry an expiry.
        let state = self.store.get_tier_state(account_id).await?;
        if !state.tier.is_premium() {
            return Err(TierboxError::InvalidInput(format!(
                "account {account_id} is not premium"
            )));
        }

        let expiry = expiry_after(now, duration)?;
        self.store.set_expiry(account_id, expiry).await?;
        info!(account_id, %expiry, "premium expiration scheduled");
        Ok(expiry)
    }
}

fn expiry_after(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(duration).ok_or_else(|| {
        TierboxError::InvalidInput(format!("premium period {duration} is out of range"))
    })
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::{SqlMetadataStore, TierLedgerStore};
    use crate::ErrorKind;
    use chrono::SubsecRound;

    async fn setup() -> (Arc<SqlMetadataStore>, PackageService) {
        let db = Database::open_in_memory().await.unwrap();
        let store = Arc::new(SqlMetadataStore::new(db));
        let service = PackageService::new(store.clone());
        (store, service)
    }

    #[tokio::test]
    async fn test_open_account_defaults() {
        let (store, service) = setup().await;
        service.open_account(1).await.unwrap();

        let state = store.get_tier_state(1).await.unwrap();
        assert_eq!(state.tier, Tier::Free);
        assert!(state.tier_expiry.is_none());

        let snapshot = store.get_storage(1).await.unwrap();
        assert_eq!(snapshot.free_used, 0);
        assert_eq!(snapshot.free_limit, 2_097_152);
        assert_eq!(snapshot.premium_used, 0);
        assert_eq!(snapshot.premium_limit, 5_242_880);
    }

    #[tokio::test]
    async fn test_open_account_twice_is_rejected() {
        let (_, service) = setup().await;
        service.open_account(1).await.unwrap();

        let err = service.open_account(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_open_account_custom_limits() {
        let (store, _) = setup().await;
        let service = PackageService::new(store.clone()).with_limits(10, 20);
        service.open_account(3).await.unwrap();

        let snapshot = store.get_storage(3).await.unwrap();
        assert_eq!(snapshot.free_limit, 10);
        assert_eq!(snapshot.premium_limit, 20);
    }

    #[tokio::test]
    async fn test_upgrade_schedules_expiry() {
        let (_, service) = setup().await;
        service.open_account(1).await.unwrap();
        let now = Utc::now().trunc_subsecs(6);

        let state = service.change_tier(1, Tier::Premium, now).await.unwrap();
        assert_eq!(state.tier, Tier::Premium);
        assert_eq!(state.tier_expiry, Some(now + Duration::seconds(120)));

        let r = service.effective_tier(1, now).await.unwrap();
        assert_eq!(r, Resolution::valid(Tier::Premium));

        let r = service
            .effective_tier(1, now + Duration::seconds(121))
            .await
            .unwrap();
        assert!(r.is_lapsed());
    }

    #[tokio::test]
    async fn test_permanent_premium() {
        let (store, _) = setup().await;
        let service = PackageService::new(store.clone()).with_premium_duration(None);
        service.open_account(1).await.unwrap();

        let state = service
            .change_tier(1, Tier::Premium, Utc::now())
            .await
            .unwrap();
        assert!(state.tier_expiry.is_none());
    }

    #[tokio::test]
    async fn test_downgrade_clears_expiry() {
        let (_, service) = setup().await;
        service.open_account(1).await.unwrap();
        let now = Utc::now();
        service.change_tier(1, Tier::Premium, now).await.unwrap();

        let state = service.change_tier(1, Tier::Free, now).await.unwrap();
        assert_eq!(state.tier, Tier::Free);
        assert!(state.tier_expiry.is_none());
        assert!(state.lapsed_at.is_none());
    }

    #[tokio::test]
    async fn test_schedule_expiration() {
        let (store, service) = setup().await;
        service.open_account(1).await.unwrap();
        let now = Utc::now().trunc_subsecs(6);

        let err = service
            .schedule_expiration(1, Duration::days(30), now)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        service.change_tier(1, Tier::Premium, now).await.unwrap();

        let expiry = service
            .schedule_expiration(1, Duration::days(30), now)
            .await
            .unwrap();
        assert_eq!(expiry, now + Duration::days(30));
        assert_eq!(store.get_tier_state(1).await.unwrap().tier_expiry, Some(expiry));

        let err = service
            .schedule_expiration(1, Duration::zero(), now)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_out_of_range_expiration_is_rejected() {
        let (_, service) = setup().await;
        service.open_account(1).await.unwrap();
        service.change_tier(1, Tier::Premium, Utc::now()).await.unwrap();

        let err = service
            .schedule_expiration(1, Duration::MAX, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (_, service) = setup().await;
        let err = service
            .change_tier(9, Tier::Premium, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
