//! Periodic eviction for durable request logs.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::SweepConfig;
use crate::ratelimit::{Backend, RateLimiter};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Owns one background sweep task per durable storage key.
///
/// Lazy eviction alone keeps every limiter correct; the sweep only bounds how
/// long expired timestamps sit in a slot between calls. Tasks stop on
/// [`Sweeper::stop`], [`Sweeper::shutdown`], or when the sweeper is dropped.
pub struct Sweeper {
    interval: Duration,
    tasks: DashMap<String, JoinHandle<()>>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("interval", &self.interval)
            .field("watched", &self.tasks.len())
            .finish()
    }
}

impl Sweeper {
    /// Create a sweeper with the given interval (at least one millisecond).
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            tasks: DashMap::new(),
        }
    }

    /// Create a sweeper from configuration, or `None` when the sweep is
    /// disabled or has no usable interval.
    pub fn from_config(config: &SweepConfig) -> Option<Self> {
        if !config.enabled || config.interval_secs == 0 {
            debug!(
                enabled = config.enabled,
                interval_secs = config.interval_secs,
                "Request log sweep disabled"
            );
            return None;
        }
        Some(Self::new(Duration::from_secs(config.interval_secs)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start sweeping `limiter`'s slot.
    ///
    /// Returns `false` without spawning anything when the limiter is transient
    /// or its storage key is already being swept. Must be called from within a
    /// tokio runtime.
    pub fn watch(&self, limiter: Arc<RateLimiter>) -> bool {
        if limiter.backend() != Backend::Durable {
            debug!(
                storage_key = %limiter.storage_key(),
                "Transient limiter needs no sweep"
            );
            return false;
        }

        match self.tasks.entry(limiter.storage_key().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                info!(
                    storage_key = %slot.key(),
                    interval_ms = self.interval.as_millis() as u64,
                    "Starting request log sweep"
                );
                slot.insert(tokio::spawn(sweep_loop(limiter, self.interval)));
                true
            }
        }
    }

    /// Whether a sweep task is running for `storage_key`.
    pub fn is_watching(&self, storage_key: &str) -> bool {
        self.tasks.contains_key(storage_key)
    }

    /// Storage keys currently being swept.
    pub fn watched_keys(&self) -> Vec<String> {
        self.tasks.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop the sweep for `storage_key`. Returns `false` if none was running.
    pub fn stop(&self, storage_key: &str) -> bool {
        match self.tasks.remove(storage_key) {
            Some((key, handle)) => {
                handle.abort();
                info!(storage_key = %key, "Stopped request log sweep");
                true
            }
            None => false,
        }
    }

    /// Stop every sweep. Idempotent.
    pub fn shutdown(&self) {
        let keys = self.watched_keys();
        for key in keys {
            self.stop(&key);
        }
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
    }
}

async fn sweep_loop(limiter: Arc<RateLimiter>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let evicted = limiter.sweep();
        if evicted > 0 {
            debug!(
                storage_key = %limiter.storage_key(),
                evicted,
                "Swept expired requests"
            );
        }
    }
}
