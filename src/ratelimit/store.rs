//! Transient and durable request log stores.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::backend::{Backend, LogStore};
use super::log::RequestLog;
use crate::error::{FormgateError, Result};
use crate::storage::SlotStorage;

/// Request log owned by a single limiter and lost with it.
#[derive(Debug, Default)]
pub struct TransientStore {
    log: Mutex<RequestLog>,
}

impl TransientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for TransientStore {
    fn backend(&self) -> Backend {
        Backend::Transient
    }

    fn load(&self) -> Result<RequestLog> {
        Ok(self.log.lock().clone())
    }

    fn save(&self, log: &RequestLog) -> Result<()> {
        *self.log.lock() = log.clone();
        Ok(())
    }
}

/// Request log kept as a JSON array in a named slot of a [`SlotStorage`].
pub struct DurableStore {
    slots: Arc<dyn SlotStorage>,
    key: String,
}

impl DurableStore {
    pub fn new(slots: Arc<dyn SlotStorage>, key: impl Into<String>) -> Self {
        Self {
            slots,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("key", &self.key)
            .finish()
    }
}

impl LogStore for DurableStore {
    fn backend(&self) -> Backend {
        Backend::Durable
    }

    fn load(&self) -> Result<RequestLog> {
        let Some(raw) = self.slots.get_item(&self.key)? else {
            return Ok(RequestLog::new());
        };

        serde_json::from_str(&raw).map_err(|source| FormgateError::Corrupt {
            key: self.key.clone(),
            source,
        })
    }

    fn save(&self, log: &RequestLog) -> Result<()> {
        let encoded = serde_json::to_string(log)?;
        trace!(key = %self.key, entries = log.len(), "Saving request log");
        self.slots.set_item(&self.key, &encoded)
    }
}
