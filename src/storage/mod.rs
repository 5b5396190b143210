//! Named slot storage for durable request logs.
//!
//! A slot store maps string keys to string values, the same shape as a browser's
//! `localStorage`. Every limiter that addresses the same key on the same store
//! reads and writes the same log. There is no compare-and-swap, so concurrent
//! writers on one slot can race.

mod file;
mod memory;

use std::sync::Arc;

pub use file::FileSlots;
pub use memory::MemorySlots;

use crate::config::StorageConfig;
use crate::error::Result;

/// A string-keyed slot store.
pub trait SlotStorage: Send + Sync {
    /// Read a slot, `None` if it has never been written or was removed.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a slot.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a slot. Removing a missing slot is not an error.
    ///
    /// Limiters never call this (`reset` writes an empty log instead); it
    /// completes the `localStorage` surface for tools that manage slots.
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// Open the slot store described by `config`: a directory of slot files when
/// `dir` is set, an in-memory map otherwise.
pub fn open(config: &StorageConfig) -> Result<Arc<dyn SlotStorage>> {
    match &config.dir {
        Some(dir) => Ok(Arc::new(FileSlots::open(dir)?)),
        None => {
            let slots = match config.quota_bytes {
                Some(quota) => MemorySlots::with_quota(quota),
                None => MemorySlots::new(),
            };
            Ok(Arc::new(slots))
        }
    }
}
