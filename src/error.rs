//! Error types for tierbox.

use std::fmt;

use thiserror::Error;

use crate::package::Tier;

/// Why access to a premium-tagged file was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The account had premium, but the subscription period has elapsed.
    SubscriptionLapsed,
    /// The account does not hold premium (never had it, or left it deliberately).
    UpgradeRequired,
}

impl DenyReason {
    /// User-facing explanation, naming the tier needed to regain access.
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::SubscriptionLapsed => {
                "this file was uploaded with a premium package, but your premium subscription has expired; renew premium to access it"
            }
            DenyReason::UpgradeRequired => {
                "this file was uploaded with a premium package; upgrade to premium to access it"
            }
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Stable machine-readable error kind exposed to request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    QuotaExceeded,
    AccessDenied,
    PackageExpired,
    UpstreamUnavailable,
    CriticalInconsistency,
    InvalidInput,
    Configuration,
}

impl ErrorKind {
    /// Snake-case code for transport layers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::PackageExpired => "package_expired",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::CriticalInconsistency => "critical_inconsistency",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common error type for tierbox.
#[derive(Error, Debug)]
pub enum TierboxError {
    /// File or account absent, or owned by a different account.
    #[error("{0} not found")]
    NotFound(String),

    /// Upload would push the tier ledger past its limit.
    #[error("storage limit exceeded. Available: {available} bytes, File size: {requested} bytes")]
    QuotaExceeded {
        /// Bytes still free in the ledger (`limit - used`).
        available: i64,
        /// Size of the rejected upload.
        requested: i64,
    },

    /// Access to a premium-tagged file was refused.
    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    /// Upload blocked because the premium period has lapsed.
    #[error("your premium package has expired; upgrade to continue uploading files")]
    PackageExpired,

    /// Blob store or metadata store call failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// File and blob are gone but the ledger was not decremented.
    #[error(
        "CRITICAL: ledger not decremented after deleting file {file_id} of account {account_id} \
         ({size} bytes on {tier} tier): {detail}"
    )]
    CriticalInconsistency {
        file_id: i64,
        account_id: i64,
        tier: Tier,
        size: i64,
        detail: String,
    },

    /// Rejected caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TierboxError {
    /// Machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TierboxError::NotFound(_) => ErrorKind::NotFound,
            TierboxError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            TierboxError::AccessDenied(_) => ErrorKind::AccessDenied,
            TierboxError::PackageExpired => ErrorKind::PackageExpired,
            TierboxError::UpstreamUnavailable(_) | TierboxError::Io(_) => {
                ErrorKind::UpstreamUnavailable
            }
            TierboxError::CriticalInconsistency { .. } => ErrorKind::CriticalInconsistency,
            TierboxError::InvalidInput(_) => ErrorKind::InvalidInput,
            TierboxError::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Whether this error needs operator attention rather than a user-facing reply.
    pub fn is_critical(&self) -> bool {
        matches!(self, TierboxError::CriticalInconsistency { .. })
    }

    /// Message suitable for the end user.
    ///
    /// Operator detail of critical errors stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            TierboxError::CriticalInconsistency { .. } => {
                "Something went wrong while deleting your file. Please try again later or contact support."
                    .to_string()
            }
            TierboxError::AccessDenied(reason) => reason.message().to_string(),
            TierboxError::UpstreamUnavailable(_) | TierboxError::Io(_) => {
                "Storage is temporarily unavailable. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

// Metadata store failures surface as upstream errors.
impl From<sqlx::Error> for TierboxError {
    fn from(e: sqlx::Error) -> Self {
        TierboxError::UpstreamUnavailable(format!("metadata store: {e}"))
    }
}

/// Result type alias for tierbox operations.
pub type Result<T> = std::result::Result<T, TierboxError>;
