//! SQL-based alert evaluation.
//!
//! The [`engine::AlertEngine`] owns the in-memory rule and channel caches,
//! re-runs each enabled rule's count query over its trailing time window on
//! a fixed tick, and fans fired alerts out to every enabled notification
//! channel. All durable state lives in the store; the caches are a
//! load-time copy kept in sync by the engine's mutation operations.

pub mod engine;
