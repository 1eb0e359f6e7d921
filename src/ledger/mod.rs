//! Tier ledger for tierbox.
//!
//! One row per account carrying the stored tier, the optional premium
//! expiry and the two independent per-tier storage counters.

mod repository;
mod types;

pub use repository::AccountRepository;
pub use types::{
    AccountTierState, NewAccount, StorageSnapshot, DEFAULT_FREE_LIMIT, DEFAULT_PREMIUM_LIMIT,
};
