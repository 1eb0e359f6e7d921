//! Account tier state and storage ledger types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::package::Tier;

/// Default free-tier storage limit (2 MiB).
pub const DEFAULT_FREE_LIMIT: i64 = 2 * 1024 * 1024;

/// Default premium-tier storage limit (5 MiB).
pub const DEFAULT_PREMIUM_LIMIT: i64 = 5 * 1024 * 1024;

/// Raw, persisted tier state of an account.
///
/// `tier` may be stale between sweeps; use the resolver for decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTierState {
    /// Account ID.
    pub account_id: i64,
    /// Stored tier.
    pub tier: Tier,
    /// Scheduled premium expiry, `None` when no expiry is scheduled.
    pub tier_expiry: Option<DateTime<Utc>>,
    /// When the sweep persisted a premium lapse. Cleared by any explicit tier change.
    pub lapsed_at: Option<DateTime<Utc>>,
}

/// Per-tier used/limit byte counters of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageSnapshot {
    pub free_used: i64,
    pub free_limit: i64,
    pub premium_used: i64,
    pub premium_limit: i64,
}

impl StorageSnapshot {
    /// Bytes used on the given tier.
    pub fn used(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Free => self.free_used,
            Tier::Premium => self.premium_used,
        }
    }

    /// Byte limit of the given tier.
    pub fn limit(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Free => self.free_limit,
            Tier::Premium => self.premium_limit,
        }
    }

    /// Bytes still available on the given tier (`limit - used`).
    pub fn available(&self, tier: Tier) -> i64 {
        self.limit(tier) - self.used(tier)
    }

    /// Whether `size` more bytes fit on the given tier.
    pub fn fits(&self, tier: Tier, size: i64) -> bool {
        self.used(tier) + size <= self.limit(tier)
    }
}

/// Data for provisioning a new account ledger.
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Account ID, issued by the identity service.
    pub account_id: i64,
    /// Free-tier storage limit in bytes.
    pub free_limit: i64,
    /// Premium-tier storage limit in bytes.
    pub premium_limit: i64,
}

impl NewAccount {
    /// Create a new account with the default limits.
    pub fn new(account_id: i64) -> Self {
        Self {
            account_id,
            free_limit: DEFAULT_FREE_LIMIT,
            premium_limit: DEFAULT_PREMIUM_LIMIT,
        }
    }

    /// Override the per-tier limits.
    pub fn with_limits(mut self, free_limit: i64, premium_limit: i64) -> Self {
        self.free_limit = free_limit;
        self.premium_limit = premium_limit;
        self
    }
}
