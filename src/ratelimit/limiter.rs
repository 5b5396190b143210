//! Core sliding-window rate limiter implementation.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::backend::{Backend, LogStore};
use super::clock::{Clock, SystemClock};
use super::log::RequestLog;
use super::store::{DurableStore, TransientStore};
use crate::config::LimiterConfig;
use crate::error::Result;
use crate::storage::SlotStorage;

/// Point-in-time view of a limiter, derived from one cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStatus {
    pub request_count: u64,
    pub remaining_requests: u64,
    pub max_requests: u32,
    /// Milliseconds until a slot frees up, zero when one is free now
    pub time_until_reset: u64,
    pub can_make_request: bool,
}

/// Outcome of [`RateLimiter::try_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request was recorded.
    Allowed,
    /// The window is full. Nothing was recorded.
    Rejected {
        /// Milliseconds until the oldest entry leaves the window.
        retry_after_ms: u64,
        /// Window length used for the decision.
        window_ms: u64,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

/// Sliding-window limiter over a request log.
///
/// At most `max_requests` accepted requests are counted inside any trailing
/// window of `window_ms`. Expired entries are evicted lazily by every call.
///
/// Every operation is total: if the backing store cannot be read or written,
/// the limiter logs a warning and treats the log as empty for that call.
///
/// # Concurrency
///
/// One instance serialises its own read-modify-write sections, so sharing it
/// across threads behaves like a single browser context. Separate instances on
/// the same durable slot are not coordinated: two of them may both observe a
/// free slot and both record, overshooting the quota by the number of racing
/// writers.
pub struct RateLimiter {
    config: LimiterConfig,
    store: Box<dyn LogStore>,
    clock: Arc<dyn Clock>,
    /// Serialises load/evict/save sequences on this instance
    guard: Mutex<()>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("backend", &self.store.backend())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter using the system clock.
    ///
    /// `slots` backs the durable backend and is ignored for transient limiters.
    pub fn new(config: LimiterConfig, slots: Arc<dyn SlotStorage>) -> Result<Self> {
        Self::with_clock(config, slots, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit clock.
    pub fn with_clock(
        config: LimiterConfig,
        slots: Arc<dyn SlotStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store: Box<dyn LogStore> = match config.backend {
            Backend::Durable => Box::new(DurableStore::new(slots, config.storage_key.clone())),
            Backend::Transient => Box::new(TransientStore::new()),
        };
        Self::with_store(config, store, clock)
    }

    /// Create a transient limiter, which needs no slot store.
    pub fn transient(config: LimiterConfig) -> Result<Self> {
        let config = config.with_backend(Backend::Transient);
        Self::with_store(config, Box::new(TransientStore::new()), Arc::new(SystemClock))
    }

    /// Create a limiter over any [`LogStore`].
    pub fn with_store(
        config: LimiterConfig,
        store: Box<dyn LogStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        debug!(
            max_requests = config.max_requests,
            window_ms = config.window_ms,
            backend = %store.backend(),
            storage_key = %config.storage_key,
            "Creating rate limiter"
        );

        Ok(Self {
            config,
            store,
            clock,
            guard: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn backend(&self) -> Backend {
        self.store.backend()
    }

    pub fn storage_key(&self) -> &str {
        &self.config.storage_key
    }

    /// Whether a request made now would be accepted. Only evicts.
    pub fn can_make_request(&self) -> bool {
        let _guard = self.guard.lock();
        let log = self.cleaned_log(self.clock.now_millis());
        self.has_capacity(&log)
    }

    /// Record a request if the window has room.
    ///
    /// Returns `false` without touching the log when the window is full.
    pub fn record_request(&self) -> bool {
        self.try_record().is_allowed()
    }

    /// Record a request if the window has room, reporting how long to back off
    /// otherwise.
    pub fn try_record(&self) -> RateLimitDecision {
        let _guard = self.guard.lock();
        let now = self.clock.now_millis();
        let mut log = self.cleaned_log(now);

        if !self.has_capacity(&log) {
            let retry_after_ms = self.wait_for_capacity(&log, now);
            debug!(
                storage_key = %self.config.storage_key,
                count = log.len(),
                limit = self.config.max_requests,
                retry_after_ms,
                "Rate limit exceeded"
            );
            return RateLimitDecision::Rejected {
                retry_after_ms,
                window_ms: self.config.window_ms,
            };
        }

        log.push(now);
        self.persist(&log);

        trace!(
            storage_key = %self.config.storage_key,
            count = log.len(),
            "Recorded request"
        );
        RateLimitDecision::Allowed
    }

    /// Number of accepted requests inside the current window.
    pub fn request_count(&self) -> u64 {
        let _guard = self.guard.lock();
        self.cleaned_log(self.clock.now_millis()).len() as u64
    }

    /// Requests still available in the current window.
    pub fn remaining_requests(&self) -> u64 {
        let _guard = self.guard.lock();
        let log = self.cleaned_log(self.clock.now_millis());
        self.remaining(&log)
    }

    /// Milliseconds until the next request would be accepted; zero if now.
    pub fn time_until_next_request(&self) -> u64 {
        let _guard = self.guard.lock();
        let now = self.clock.now_millis();
        let log = self.cleaned_log(now);
        self.wait_for_capacity(&log, now)
    }

    /// Same as [`RateLimiter::time_until_next_request`]. The window rolls, so
    /// there is no separate reset instant.
    pub fn time_until_reset(&self) -> u64 {
        self.time_until_next_request()
    }

    /// Clear the log unconditionally.
    pub fn reset(&self) {
        let _guard = self.guard.lock();
        self.persist(&RequestLog::new());
        debug!(storage_key = %self.config.storage_key, "Rate limiter reset");
    }

    /// Snapshot of the limiter.
    pub fn status(&self) -> LimiterStatus {
        let _guard = self.guard.lock();
        let now = self.clock.now_millis();
        let log = self.cleaned_log(now);

        LimiterStatus {
            request_count: log.len() as u64,
            remaining_requests: self.remaining(&log),
            max_requests: self.config.max_requests,
            time_until_reset: self.wait_for_capacity(&log, now),
            can_make_request: self.has_capacity(&log),
        }
    }

    /// Run one eviction pass and return how many entries were dropped.
    pub fn sweep(&self) -> usize {
        let _guard = self.guard.lock();
        let now = self.clock.now_millis();
        let mut log = self.load_log();
        let evicted = log.evict_expired(now, self.config.window_ms);
        if evicted > 0 {
            self.persist(&log);
        }
        evicted
    }

    /// Load, evict expired entries, and write back only if something changed.
    fn cleaned_log(&self, now: u64) -> RequestLog {
        let mut log = self.load_log();
        let evicted = log.evict_expired(now, self.config.window_ms);

        if evicted > 0 {
            debug!(
                storage_key = %self.config.storage_key,
                evicted,
                retained = log.len(),
                "Evicted expired requests"
            );
            self.persist(&log);
        }

        log
    }

    fn load_log(&self) -> RequestLog {
        match self.store.load() {
            Ok(log) => log,
            Err(e) => {
                warn!(
                    storage_key = %self.config.storage_key,
                    error = %e,
                    "Failed to read request log, treating it as empty"
                );
                RequestLog::new()
            }
        }
    }

    fn persist(&self, log: &RequestLog) {
        if let Err(e) = self.store.save(log) {
            warn!(
                storage_key = %self.config.storage_key,
                error = %e,
                "Failed to write request log"
            );
        }
    }

    fn has_capacity(&self, log: &RequestLog) -> bool {
        (log.len() as u64) < u64::from(self.config.max_requests)
    }

    fn remaining(&self, log: &RequestLog) -> u64 {
        u64::from(self.config.max_requests).saturating_sub(log.len() as u64)
    }

    fn wait_for_capacity(&self, log: &RequestLog, now: u64) -> u64 {
        if self.has_capacity(log) {
            return 0;
        }
        log.time_until_oldest_expires(now, self.config.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormgateError;
    use crate::ratelimit::ManualClock;
    use crate::storage::MemorySlots;

    fn durable(max: u32, window_ms: u64, slots: &MemorySlots, clock: &ManualClock) -> RateLimiter {
        RateLimiter::with_clock(
            LimiterConfig::new(max, window_ms).with_storage_key("test"),
            Arc::new(slots.clone()),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    /// Slot store that fails every operation.
    struct BrokenSlots;

    impl SlotStorage for BrokenSlots {
        fn get_item(&self, _key: &str) -> Result<Option<String>> {
            Err(FormgateError::Storage("storage disabled".to_string()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
            Err(FormgateError::Storage("storage disabled".to_string()))
        }

        fn remove_item(&self, _key: &str) -> Result<()> {
            Err(FormgateError::Storage("storage disabled".to_string()))
        }
    }

    #[test]
    fn test_three_per_minute() {
        let clock = ManualClock::new(1_700_000_000_000);
        let limiter = durable(3, 60_000, &MemorySlots::new(), &clock);

        assert!(limiter.record_request());
        assert!(limiter.record_request());
        assert!(limiter.record_request());
        assert_eq!(limiter.remaining_requests(), 0);

        // The 4th request should be rejected
        assert!(!limiter.record_request());
        assert_eq!(limiter.request_count(), 3);
    }

    #[test]
    fn test_empty_limiter_status() {
        let clock = ManualClock::new(1_700_000_000_000);
        let limiter = durable(5, 60_000, &MemorySlots::new(), &clock);

        assert_eq!(
            limiter.status(),
            LimiterStatus {
                request_count: 0,
                remaining_requests: 5,
                max_requests: 5,
                time_until_reset: 0,
                can_make_request: true,
            }
        );
        assert_eq!(limiter.time_until_next_request(), 0);
    }

    #[test]
    fn test_time_decay() {
        let clock = ManualClock::new(0);
        let limiter = durable(1, 1000, &MemorySlots::new(), &clock);

        assert!(limiter.record_request());

        clock.set(500);
        assert!(!limiter.record_request());
        assert_eq!(limiter.time_until_next_request(), 500);
        assert_eq!(limiter.time_until_reset(), 500);

        clock.set(1001);
        assert!(limiter.record_request());
    }

    #[test]
    fn test_quota_never_exceeded_within_window() {
        let clock = ManualClock::new(10_000);
        let limiter = durable(4, 1000, &MemorySlots::new(), &clock);

        let mut accepted = 0;
        for _ in 0..50 {
            if limiter.record_request() {
                accepted += 1;
            }
            clock.advance(10);
        }

        assert_eq!(accepted, 4);
    }

    #[test]
    fn test_rejected_record_does_not_mutate() {
        let clock = ManualClock::new(5_000);
        let slots = MemorySlots::new();
        let limiter = durable(2, 10_000, &slots, &clock);

        limiter.record_request();
        clock.advance(1);
        limiter.record_request();
        let stored = slots.get_item("test").unwrap();

        assert!(!limiter.can_make_request());
        assert!(!limiter.record_request());
        assert!(!limiter.can_make_request());
        assert_eq!(slots.get_item("test").unwrap(), stored);
    }

    #[test]
    fn test_try_record_reports_retry_after() {
        let clock = ManualClock::new(2_000);
        let limiter = durable(1, 1000, &MemorySlots::new(), &clock);

        assert_eq!(limiter.try_record(), RateLimitDecision::Allowed);

        clock.advance(300);
        assert_eq!(
            limiter.try_record(),
            RateLimitDecision::Rejected {
                retry_after_ms: 700,
                window_ms: 1000,
            }
        );
    }

    #[test]
    fn test_status_is_idempotent() {
        let clock = ManualClock::new(50_000);
        let limiter = durable(2, 1000, &MemorySlots::new(), &clock);

        limiter.record_request();
        clock.advance(100);
        limiter.record_request();
        clock.advance(100);

        let first = limiter.status();
        let second = limiter.status();
        assert_eq!(first, second);
        assert_eq!(first.request_count, 2);
        assert!(!first.can_make_request);
        assert_eq!(first.time_until_reset, 800);
    }

    #[test]
    fn test_reset() {
        let clock = ManualClock::new(1_000);
        let slots = MemorySlots::new();
        let limiter = durable(1, 60_000, &slots, &clock);

        limiter.record_request();
        assert!(!limiter.can_make_request());

        limiter.reset();
        assert_eq!(limiter.request_count(), 0);
        assert!(limiter.can_make_request());
        assert_eq!(slots.get_item("test").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_zero_quota_always_rejects() {
        let clock = ManualClock::new(1_000);
        let limiter = durable(0, 1000, &MemorySlots::new(), &clock);

        assert!(!limiter.can_make_request());
        assert!(!limiter.record_request());
        assert_eq!(limiter.remaining_requests(), 0);
        // Nothing to wait for: the log is empty
        assert_eq!(limiter.time_until_next_request(), 0);

        limiter.reset();
        assert!(!limiter.can_make_request());
    }

    #[test]
    fn test_cleanup_writes_only_on_change() {
        let clock = ManualClock::new(10_000);
        let slots = MemorySlots::new();
        slots.set_item("test", "[9500, 9900]").unwrap();
        let limiter = durable(5, 1000, &slots, &clock);

        // Nothing expired: the original (unnormalised) text is left alone
        assert_eq!(limiter.request_count(), 2);
        assert_eq!(slots.get_item("test").unwrap().as_deref(), Some("[9500, 9900]"));

        clock.set(10_600);
        assert_eq!(limiter.request_count(), 1);
        assert_eq!(slots.get_item("test").unwrap().as_deref(), Some("[9900]"));
    }

    #[test]
    fn test_durable_limiters_share_a_slot() {
        let clock = ManualClock::new(1_000);
        let slots = MemorySlots::new();
        let tab_a = durable(2, 60_000, &slots, &clock);
        let tab_b = durable(2, 60_000, &slots, &clock);

        assert!(tab_a.record_request());
        assert!(tab_b.record_request());

        assert!(!tab_a.can_make_request());
        assert_eq!(tab_b.request_count(), 2);
    }

    #[test]
    fn test_transient_limiters_are_isolated() {
        let clock = ManualClock::new(1_000);
        let slots = MemorySlots::new();
        let config = LimiterConfig::new(1, 60_000).with_backend(Backend::Transient);

        let build = |config: LimiterConfig| {
            RateLimiter::with_clock(config, Arc::new(slots.clone()), Arc::new(clock.clone()))
                .unwrap()
        };
        let a = build(config.clone());
        let b = build(config);

        assert!(a.record_request());
        assert!(b.record_request());
        assert!(!a.can_make_request());
        assert!(slots.is_empty());
    }

    #[test]
    fn test_transient_constructor() {
        let limiter = RateLimiter::transient(LimiterConfig::new(2, 60_000)).unwrap();
        assert_eq!(limiter.backend(), Backend::Transient);
        assert!(limiter.record_request());
        assert_eq!(limiter.remaining_requests(), 1);
    }

    #[test]
    fn test_corrupt_slot_is_treated_as_empty() {
        let clock = ManualClock::new(1_000);
        let slots = MemorySlots::new();
        slots.set_item("test", "not json").unwrap();
        let limiter = durable(2, 60_000, &slots, &clock);

        assert_eq!(limiter.request_count(), 0);
        assert!(limiter.can_make_request());

        // Recording replaces the corrupt content with a valid log
        assert!(limiter.record_request());
        assert_eq!(slots.get_item("test").unwrap().as_deref(), Some("[1000]"));
    }

    #[test]
    fn test_broken_storage_never_fails() {
        let clock = ManualClock::new(1_000);
        let limiter = RateLimiter::with_clock(
            LimiterConfig::new(1, 60_000),
            Arc::new(BrokenSlots),
            Arc::new(clock),
        )
        .unwrap();

        // Each call sees an empty log, so every request is let through
        assert!(limiter.can_make_request());
        assert!(limiter.record_request());
        assert!(limiter.record_request());
        assert_eq!(limiter.request_count(), 0);
        assert_eq!(limiter.status().remaining_requests, 1);
        limiter.reset();
        assert_eq!(limiter.sweep(), 0);
    }

    #[test]
    fn test_quota_exceeded_write_degrades() {
        let clock = ManualClock::new(1_000);
        // "test" + "[1000]" = 10 bytes fits, a second timestamp does not
        let slots = MemorySlots::with_quota(10);
        let limiter = durable(5, 60_000, &slots, &clock);

        assert!(limiter.record_request());
        assert!(limiter.record_request());
        assert_eq!(limiter.request_count(), 1);
    }

    #[test]
    fn test_sweep_evicts_and_counts() {
        let clock = ManualClock::new(0);
        let slots = MemorySlots::new();
        let limiter = durable(5, 1000, &slots, &clock);

        limiter.record_request();
        clock.set(400);
        limiter.record_request();

        clock.set(1200);
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(slots.get_item("test").unwrap().as_deref(), Some("[400]"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = RateLimiter::new(LimiterConfig::new(1, 0), Arc::new(MemorySlots::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let clock = ManualClock::new(0);
        let limiter = durable(5, 1000, &MemorySlots::new(), &clock);

        let json = serde_json::to_value(limiter.status()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "requestCount": 0,
                "remainingRequests": 5,
                "maxRequests": 5,
                "timeUntilReset": 0,
                "canMakeRequest": true,
            })
        );
    }

    #[test]
    fn test_shared_across_threads() {
        let limiter = Arc::new(RateLimiter::transient(LimiterConfig::new(10, 60_000)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..5).filter(|_| limiter.record_request()).count())
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 10);
    }
}
