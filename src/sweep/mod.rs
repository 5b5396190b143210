//! Background sweeping of durable request logs.
//!
//! Durable logs are only trimmed when a limiter touches them. A [`Sweeper`]
//! owned by the code that builds durable limiters runs a periodic eviction per
//! storage key so slots do not hold stale timestamps between calls.

mod sweeper;

pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL};
