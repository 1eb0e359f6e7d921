//! Access policy for stored files.
//!
//! A file's upload-time tier is compared against the account's resolved
//! effective tier. Free files are always accessible; premium files need
//! an effective premium tier.

use crate::error::DenyReason;
use crate::package::{Resolution, Tier};

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Permit,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_permitted(&self) -> bool {
        matches!(self, AccessDecision::Permit)
    }
}

/// Decide access to a file tagged `file_tag` for an account resolved as
/// `effective_tier`.
pub fn evaluate(file_tag: Tier, effective_tier: Tier, is_currently_valid: bool) -> AccessDecision {
    match (file_tag, effective_tier) {
        (Tier::Free, _) => AccessDecision::Permit,
        (Tier::Premium, Tier::Premium) => AccessDecision::Permit,
        (Tier::Premium, Tier::Free) if !is_currently_valid => {
            AccessDecision::Deny(DenyReason::SubscriptionLapsed)
        }
        (Tier::Premium, Tier::Free) => AccessDecision::Deny(DenyReason::UpgradeRequired),
    }
}

/// [`evaluate`] against a resolver result.
pub fn evaluate_resolution(file_tag: Tier, resolution: &Resolution) -> AccessDecision {
    evaluate(file_tag, resolution.tier, resolution.is_currently_valid)
}

/// Whether a file with this tag shows up in listings for the resolution.
pub fn is_visible(file_tag: Tier, resolution: &Resolution) -> bool {
    !(file_tag.is_premium() && !resolution.tier.is_premium())
}
