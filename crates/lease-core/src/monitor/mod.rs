//! Budget and expiration monitoring.
//!
//! The monitor is a *producer* of transition requests, not a
//! decision-maker: it scans non-terminal leases, compares reported spend
//! against the budget threshold and the deadline against the clock, and
//! proposes `freeze` or `expire` to the engine with a freshly read
//! version. Races with user-driven transitions are resolved by the
//! engine's version check — a lost race is left for the next scan cycle,
//! never forced.
//!
//! It also ingests the external budget feed: `ingest_usage` writes the
//! reported spend through the store's compare-and-swap (the engine never
//! touches `budget_consumed`).
//!
//! # Example
//!
//! ```rust,ignore
//! let monitor = BudgetExpirationMonitor::new(
//!     engine,
//!     store,
//!     MonitorConfig::new().with_poll_interval(Duration::from_secs(10)),
//! );
//! let shutdown = Arc::new(AtomicBool::new(false));
//! tokio::spawn({
//!     let monitor = Arc::clone(&monitor);
//!     let shutdown = Arc::clone(&shutdown);
//!     async move { monitor.run(shutdown).await }
//! });
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::lease::{now_ms, LeaseEngine, LeaseError, LeaseId, LeaseStatus, SYSTEM_ACTOR};
use crate::store::LeaseStore;

/// Default interval between scan cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of compare-and-swap retries when ingesting a usage
/// sample.
pub const DEFAULT_USAGE_RETRY_LIMIT: u32 = 3;

/// One record from the external budget feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    /// The lease the spend belongs to.
    pub lease_id: LeaseId,
    /// Total reported spend in integer cents.
    pub consumed: u64,
}

/// Configuration for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Interval between scan cycles.
    pub poll_interval: Duration,
    /// Compare-and-swap retries per usage sample before giving up.
    pub usage_retry_limit: u32,
}

impl MonitorConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            usage_retry_limit: DEFAULT_USAGE_RETRY_LIMIT,
        }
    }

    /// Sets the scan interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the usage-ingestion retry limit.
    #[must_use]
    pub const fn with_usage_retry_limit(mut self, limit: u32) -> Self {
        self.usage_retry_limit = limit;
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters from one scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanOutcome {
    /// Leases examined.
    pub scanned: usize,
    /// Leases frozen for exceeding their budget.
    pub frozen: usize,
    /// Leases expired for passing their deadline.
    pub expired: usize,
    /// Transitions lost to a concurrent writer and deferred to the next
    /// cycle.
    pub conflicts: usize,
}

/// Periodic evaluator proposing `freeze` and `expire` transitions.
pub struct BudgetExpirationMonitor {
    engine: Arc<LeaseEngine>,
    store: Arc<dyn LeaseStore>,
    config: MonitorConfig,
}

impl BudgetExpirationMonitor {
    /// Creates a new monitor over the given engine and store.
    #[must_use]
    pub fn new(
        engine: Arc<LeaseEngine>,
        store: Arc<dyn LeaseStore>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    /// Returns the monitor configuration.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Applies one usage sample from the external budget feed.
    ///
    /// Writes `budget_consumed` through the store's compare-and-swap,
    /// retrying a bounded number of times on version conflicts (the feed
    /// is eventually consistent, so losing occasionally is normal).
    /// Samples for terminal leases are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::NotFound`] for unknown leases, or
    /// [`LeaseError::ConcurrentModification`] once the retry budget is
    /// spent.
    pub fn ingest_usage(&self, sample: &UsageSample) -> Result<(), LeaseError> {
        let mut attempts = 0;
        loop {
            let current = self.store.get(&sample.lease_id)?;
            if current.is_terminal() {
                debug!(
                    lease_id = %sample.lease_id,
                    status = current.status().as_str(),
                    "dropping usage sample for terminal lease"
                );
                return Ok(());
            }

            let expected_version = current.version();
            let mut updated = current;
            updated.record_usage(sample.consumed, now_ms());

            match self
                .store
                .compare_and_swap(&sample.lease_id, expected_version, updated)
            {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let lease_err: LeaseError = err.into();
                    if !lease_err.is_retryable() {
                        return Err(lease_err);
                    }
                    attempts += 1;
                    if attempts > self.config.usage_retry_limit {
                        warn!(
                            lease_id = %sample.lease_id,
                            attempts,
                            "usage sample lost every compare-and-swap; giving up"
                        );
                        return Err(lease_err);
                    }
                },
            }
        }
    }

    /// Runs one scan over every `Active` and `Frozen` lease at the given
    /// time.
    ///
    /// Expiry is checked before the budget: a lease past its deadline is
    /// expired even if it also overran its budget. Budget overruns only
    /// freeze `Active` leases — the table has no `Frozen` → `Frozen`
    /// edge, and a frozen lease is already contained.
    #[must_use]
    pub fn scan_once(&self, now_ms: u64) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        for status in [LeaseStatus::Active, LeaseStatus::Frozen] {
            for lease in self.store.list_by_status(status) {
                outcome.scanned += 1;

                if lease.is_expired_at(now_ms) {
                    match self.engine.expire(lease.id(), lease.version(), SYSTEM_ACTOR) {
                        Ok(_) => {
                            info!(lease_id = %lease.id(), "lease expired by monitor");
                            outcome.expired += 1;
                        },
                        Err(err) => Self::note_scan_failure(&mut outcome, lease.id(), &err),
                    }
                } else if status == LeaseStatus::Active && lease.is_budget_exceeded() {
                    match self.engine.freeze(
                        lease.id(),
                        lease.version(),
                        SYSTEM_ACTOR,
                        "budget threshold exceeded",
                    ) {
                        Ok(_) => {
                            info!(
                                lease_id = %lease.id(),
                                consumed = lease.budget_consumed(),
                                threshold = lease.budget_threshold(),
                                "lease frozen by monitor"
                            );
                            outcome.frozen += 1;
                        },
                        Err(err) => Self::note_scan_failure(&mut outcome, lease.id(), &err),
                    }
                }
            }
        }

        debug!(
            scanned = outcome.scanned,
            frozen = outcome.frozen,
            expired = outcome.expired,
            conflicts = outcome.conflicts,
            "monitor scan complete"
        );
        outcome
    }

    /// Scans on the configured interval until the shutdown flag is set.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "budget/expiration monitor started"
        );
        while !shutdown.load(Ordering::SeqCst) {
            let _ = self.scan_once(now_ms());
            tokio::time::sleep(self.config.poll_interval).await;
        }
        info!("budget/expiration monitor stopped");
    }

    fn note_scan_failure(outcome: &mut ScanOutcome, lease_id: &str, err: &LeaseError) {
        if err.is_retryable() {
            // A user-driven transition won the race; the next cycle will
            // re-read and re-evaluate.
            debug!(lease_id, "monitor lost transition race; deferring to next cycle");
            outcome.conflicts += 1;
        } else {
            warn!(lease_id, error = %err, "monitor-proposed transition failed");
        }
    }
}

impl std::fmt::Debug for BudgetExpirationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetExpirationMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
