//! Policy-driven retention: keeps the `logs` table bounded by row count,
//! age and on-disk size, cooperating with concurrent ingestion and rule
//! evaluation.

use crate::error::Result;
use crate::Store;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::time::interval;

/// Retention policies. A zero value disables the corresponding policy.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Keep only the N most recent logs.
    pub max_logs: i64,
    /// Delete logs older than this.
    pub max_age: Duration,
    /// Trigger a sweep when the database file exceeds this size. The
    /// deletion itself is delegated to the count or age policy.
    pub max_size_mb: f64,
    /// How often the background loop checks the policies.
    pub check_interval: std::time::Duration,
    /// Master switch.
    pub enabled: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_logs: 100_000,
            max_age: Duration::days(30),
            max_size_mb: 500.0,
            check_interval: std::time::Duration::from_secs(600),
            enabled: true,
        }
    }
}

/// Background cleanup loop over the store's bulk-delete primitives.
///
/// Holds only a weak reference to the store: retention never keeps the
/// database alive on its own, and it mutates nothing but `logs`.
pub struct RetentionManager {
    store: Weak<Store>,
    config: RetentionConfig,
    sweeping: AtomicBool,
}

impl RetentionManager {
    pub fn new(store: &Arc<Store>, config: RetentionConfig) -> Self {
        Self {
            store: Arc::downgrade(store),
            config,
            sweeping: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Run the periodic policy check until `shutdown` flips. Any in-flight
    /// sweep finishes before the task exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Retention disabled");
            return;
        }
        tracing::info!(
            max_logs = self.config.max_logs,
            max_age_secs = self.config.max_age.num_seconds(),
            max_size_mb = self.config.max_size_mb,
            check_interval_secs = self.config.check_interval.as_secs(),
            "Retention manager started"
        );
        let mut tick = interval(self.config.check_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it so startup
        // does not race ingestion with a sweep.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => self.sweep(),
                _ = shutdown.changed() => {
                    tracing::info!("Retention manager stopping");
                    return;
                }
            }
        }
    }

    /// Synchronous sweep for the ingest path. A sweep that is already
    /// running makes this a no-op.
    pub fn trigger_now(&self) {
        if self.config.enabled {
            self.sweep();
        }
    }

    fn sweep(&self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        // Single-flight: a second caller while a sweep runs backs off.
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let result = self.sweep_inner(&store);
        self.sweeping.store(false, Ordering::SeqCst);
        if let Err(e) = result {
            tracing::error!(error = %e, "Retention sweep failed");
        }
    }

    fn sweep_inner(&self, store: &Store) -> Result<()> {
        let Some(reason) = self.violation(store)? else {
            return Ok(());
        };
        tracing::info!(reason = %reason, "Retention sweep triggered");

        // Priority: a violated count cap wins, then age. The size policy
        // only triggers; it deletes through whichever policy applies.
        let deleted = if self.config.max_logs > 0 && store.count_logs()? > self.config.max_logs {
            store.delete_oldest_by_count(self.config.max_logs)?
        } else if self.config.max_age > Duration::zero() {
            store.delete_older_than(Utc::now() - self.config.max_age)?
        } else if self.config.max_logs > 0 {
            store.delete_oldest_by_count(self.config.max_logs)?
        } else {
            0
        };

        if deleted > 0 {
            tracing::info!(deleted, "Retention sweep removed logs");
            if let Err(e) = store.compact() {
                tracing::warn!(error = %e, "Compact after sweep failed");
            }
        }
        Ok(())
    }

    /// Check the enabled policies and return a human-readable trigger
    /// reason when any is violated.
    fn violation(&self, store: &Store) -> Result<Option<String>> {
        if self.config.max_logs > 0 {
            let count = store.count_logs()?;
            if count > self.config.max_logs {
                return Ok(Some(format!(
                    "log count ({count}) exceeds limit ({})",
                    self.config.max_logs
                )));
            }
        }

        if self.config.max_size_mb > 0.0 {
            let size_mb = store.storage_bytes()? as f64 / (1024.0 * 1024.0);
            if size_mb > self.config.max_size_mb {
                return Ok(Some(format!(
                    "database size ({size_mb:.1} MB) exceeds limit ({:.1} MB)",
                    self.config.max_size_mb
                )));
            }
        }

        if self.config.max_age > Duration::zero() {
            let cutoff = Utc::now() - self.config.max_age;
            let old = store.count_logs_older_than(cutoff)?;
            if old > 0 {
                return Ok(Some(format!(
                    "found {old} logs older than {}s",
                    self.config.max_age.num_seconds()
                )));
            }
        }

        Ok(None)
    }
}
