//! Log store trait for abstracting durable and transient request logs.

use serde::{Deserialize, Serialize};

use super::log::RequestLog;
use crate::error::Result;

/// Where a limiter keeps its request log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A named slot in a slot store, shared by every limiter using the same key
    #[default]
    Durable,
    /// In-process log owned by a single limiter
    Transient,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Durable => write!(f, "durable"),
            Backend::Transient => write!(f, "transient"),
        }
    }
}

/// Trait for request log stores.
///
/// This trait abstracts over the `TransientStore` and the `DurableStore` so the
/// limiter can run its sliding window over either.
pub trait LogStore: Send + Sync {
    /// Which backend this store implements.
    fn backend(&self) -> Backend;

    /// Read the full request log.
    fn load(&self) -> Result<RequestLog>;

    /// Replace the stored request log.
    fn save(&self, log: &RequestLog) -> Result<()>;
}
