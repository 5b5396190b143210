//! In-process slot store.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::SlotStorage;
use crate::error::{FormgateError, Result};

/// Slot store held in memory.
///
/// Clones share the same slots, so limiters built from clones of one
/// `MemorySlots` see each other's logs. An optional byte quota (keys plus
/// values) makes writes fail the way a full `localStorage` does.
#[derive(Debug, Clone, Default)]
pub struct MemorySlots {
    slots: Arc<DashMap<String, String>>,
    quota_bytes: Option<usize>,
    /// Held by every mutation so a quota check sees the map it is about to change
    writes: Arc<Mutex<()>>,
}

impl MemorySlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Bytes currently in use across all slots.
    pub fn used_bytes(&self) -> usize {
        self.slots
            .iter()
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl SlotStorage for MemorySlots {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.slots.get(key).map(|v| v.value().clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _writes = self.writes.lock();

        if let Some(quota) = self.quota_bytes {
            let existing = self
                .slots
                .get(key)
                .map(|v| key.len() + v.value().len())
                .unwrap_or(0);
            let needed = self.used_bytes().saturating_sub(existing) + key.len() + value.len();
            if needed > quota {
                return Err(FormgateError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }

        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let _writes = self.writes.lock();
        self.slots.remove(key);
        Ok(())
    }
}
