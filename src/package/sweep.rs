//! Expiration sweep for tierbox.
//!
//! Persists what the resolver already infers: premium accounts past their
//! expiry are rewritten to free. Each account is handled independently, so
//! one failure never aborts the batch; the next run retries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::DEFAULT_SWEEP_INTERVAL_SECS;
use crate::store::MetadataStore;
use crate::{Result, TierboxError};

/// Outcome of one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired premium accounts rewritten to free with their expiry cleared.
    pub downgraded: usize,
    /// Free accounts from earlier runs whose stale expiry was cleared.
    pub repaired: usize,
    /// Accounts left unfinished for the next run.
    pub failed: usize,
}

impl SweepReport {
    /// Accounts fully processed in this run.
    pub fn processed(&self) -> usize {
        self.downgraded + self.repaired
    }
}

/// One-shot expiration sweep over the metadata store.
#[derive(Clone)]
pub struct ExpirationSweep {
    store: Arc<dyn MetadataStore>,
}

impl ExpirationSweep {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Run one sweep at `now`.
    ///
    /// Fails only when nothing was processed and at least one account failed
    /// (or the candidate query itself failed). Partial success is reported
    /// as success.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut last_error = None;

        // Stragglers first, so an account downgraded below is not retried twice.
        match self.store.list_stale_expiry_accounts().await {
            Ok(stale) => {
                for account_id in stale {
                    match self.store.clear_expiry(account_id).await {
                        Ok(()) => {
                            debug!(account_id, "stale expiry cleared");
                            report.repaired += 1;
                        }
                        Err(e) => {
                            warn!(account_id, error = %e, "failed to clear stale expiry");
                            report.failed += 1;
                            last_error = Some(e);
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to list accounts with stale expiry"),
        }

        let expired = self.store.list_expired_premium_accounts(now).await?;
        if !expired.is_empty() {
            info!("Downgrading {} expired premium account(s)", expired.len());
        }

        for account_id in expired {
            match self.downgrade(account_id, now).await {
                Ok(()) => report.downgraded += 1,
                Err(e) => {
                    warn!(account_id, error = %e, "failed to downgrade expired account");
                    report.failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if report.processed() == 0 {
            if let Some(e) = last_error {
                return Err(TierboxError::UpstreamUnavailable(format!(
                    "expiration sweep failed for all {} account(s): {e}",
                    report.failed
                )));
            }
        }

        Ok(report)
    }

    /// Two separate mutations; if the second fails the account is picked up
    /// as a straggler next run.
    async fn downgrade(&self, account_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.store.mark_lapsed(account_id, now).await?;
        self.store.clear_expiry(account_id).await?;
        debug!(account_id, "premium package expired; downgraded to free");
        Ok(())
    }
}

/// Background task running the sweep on a fixed interval.
pub struct SweepRunner {
    sweep: ExpirationSweep,
    interval: Duration,
}

impl SweepRunner {
    /// Create a new SweepRunner with the default interval.
    pub fn new(sweep: ExpirationSweep) -> Self {
        Self {
            sweep,
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    /// Create a new SweepRunner with a custom interval.
    pub fn with_interval(sweep: ExpirationSweep, interval_secs: u64) -> Self {
        Self {
            sweep,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Run the sweep loop forever.
    pub async fn run(&self) {
        info!(
            "Expiration sweep started (interval: {} seconds)",
            self.interval.as_secs()
        );

        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            self.tick(Utc::now()).await;
        }
    }

    async fn tick(&self, now: DateTime<Utc>) {
        match self.sweep.run_sweep(now).await {
            Ok(report) if report.processed() > 0 || report.failed > 0 => info!(
                downgraded = report.downgraded,
                repaired = report.repaired,
                failed = report.failed,
                "Expiration sweep finished"
            ),
            Ok(_) => debug!("No expired premium accounts"),
            Err(e) => error!("Expiration sweep failed: {}", e),
        }
    }
}

/// Spawn the sweep loop on the tokio runtime.
pub fn start_sweep_runner(sweep: ExpirationSweep, interval_secs: u64) -> JoinHandle<()> {
    let runner = SweepRunner::with_interval(sweep, interval_secs);
    tokio::spawn(async move {
        runner.run().await;
    })
}
