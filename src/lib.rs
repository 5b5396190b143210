//! Formgate - Sliding-Window Request Limiter
//!
//! This crate throttles user actions such as form submissions. It keeps a log of
//! accepted request timestamps and admits a new request only while fewer than
//! `max_requests` fall inside the trailing window. The log lives either in a
//! named slot of a shared slot store (durable) or inside the limiter (transient).

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod storage;
pub mod sweep;
