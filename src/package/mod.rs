//! Subscription packages for tierbox.
//!
//! This module provides:
//! - The two-level tier model
//! - Lazy effective-tier resolution against the expiry timestamp
//! - Account provisioning and tier changes
//! - The expiration sweep that persists lapsed premium periods

pub mod resolver;
mod service;
mod sweep;
mod tier;

pub use resolver::{resolve_effective_tier, Resolution};
pub use service::PackageService;
pub use sweep::{start_sweep_runner, ExpirationSweep, SweepReport, SweepRunner};
pub use tier::Tier;

/// Default premium period (2 minutes).
pub const DEFAULT_PREMIUM_DURATION_SECS: u64 = 120;

/// Default interval between expiration sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
