//! Sliding-window rate limiting and request log stores.

mod backend;
mod clock;
mod limiter;
mod log;
mod store;

pub use backend::{Backend, LogStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{LimiterStatus, RateLimitDecision, RateLimiter};
pub use log::RequestLog;
pub use store::{DurableStore, TransientStore};
