//! Request log: the accepted-request timestamps of a sliding window.

use serde::{Deserialize, Serialize};

/// Timestamps (Unix-epoch milliseconds) of accepted requests, oldest first.
///
/// Serialises as a bare JSON array of integers, which is the durable slot format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestLog {
    timestamps: Vec<u64>,
}

impl RequestLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap timestamps read from storage, kept in their stored order.
    pub fn from_timestamps(timestamps: Vec<u64>) -> Self {
        Self { timestamps }
    }

    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Append an accepted request.
    pub fn push(&mut self, timestamp_ms: u64) {
        self.timestamps.push(timestamp_ms);
    }

    /// Oldest timestamp in the log.
    ///
    /// Takes the minimum rather than the first entry, since other writers of a
    /// shared slot may have appended out of order.
    pub fn oldest(&self) -> Option<u64> {
        self.timestamps.iter().copied().min()
    }

    /// Drop every entry that is `window_ms` or more older than `now_ms`.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_expired(&mut self, now_ms: u64, window_ms: u64) -> usize {
        let before = self.timestamps.len();
        self.timestamps.retain(|&t| now_ms.saturating_sub(t) < window_ms);
        before - self.timestamps.len()
    }

    /// Milliseconds until the oldest entry leaves the window, or zero when empty.
    pub fn time_until_oldest_expires(&self, now_ms: u64, window_ms: u64) -> u64 {
        match self.oldest() {
            Some(oldest) => window_ms.saturating_sub(now_ms.saturating_sub(oldest)),
            None => 0,
        }
    }
}
