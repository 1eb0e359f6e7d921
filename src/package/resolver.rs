//! Effective tier resolution.
//!
//! The stored tier is only rewritten by the sweep, so it can be stale.
//! Every quota and access decision goes through [`resolve_effective_tier`]
//! instead of trusting the raw column.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::Tier;
use crate::ledger::AccountTierState;
use crate::store::TierLedgerStore;
use crate::Result;

/// Tier an account behaves as at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Effective tier.
    pub tier: Tier,
    /// `false` when the account was premium and the period has lapsed.
    pub is_currently_valid: bool,
}

impl Resolution {
    /// Valid resolution of the given tier.
    pub fn valid(tier: Tier) -> Self {
        Self {
            tier,
            is_currently_valid: true,
        }
    }

    /// Premium that has lapsed; behaves as free.
    pub fn lapsed() -> Self {
        Self {
            tier: Tier::Free,
            is_currently_valid: false,
        }
    }

    pub fn is_lapsed(&self) -> bool {
        !self.is_currently_valid
    }
}

/// Resolve the effective tier from stored state and the current time.
///
/// Pure: never touches storage. `tier_expiry` is ignored for free accounts.
/// A free account whose lapse was persisted by the sweep keeps resolving as
/// lapsed until its tier is changed explicitly, so a request sees the same
/// answer before and after the sweep.
pub fn resolve_effective_tier(state: &AccountTierState, now: DateTime<Utc>) -> Resolution {
    match (state.tier, state.tier_expiry) {
        (Tier::Premium, Some(expiry)) if now > expiry => Resolution::lapsed(),
        (Tier::Premium, _) => Resolution::valid(Tier::Premium),
        (Tier::Free, _) if state.lapsed_at.is_some() => Resolution::lapsed(),
        (Tier::Free, _) => Resolution::valid(Tier::Free),
    }
}

/// Load an account's tier state and resolve it.
///
/// Fails with `NotFound` if the account doesn't exist.
pub async fn resolve<S>(store: &S, account_id: i64, now: DateTime<Utc>) -> Result<Resolution>
where
    S: TierLedgerStore + ?Sized,
{
    let state = store.get_tier_state(account_id).await?;
    let resolution = resolve_effective_tier(&state, now);

    if resolution.is_lapsed() {
        debug!(
            account_id,
            stored_tier = %state.tier,
            "premium period lapsed; resolving as free"
        );
    }

    Ok(resolution)
}
