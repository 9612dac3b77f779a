//! Shared domain types for the peep observability daemon.
//!
//! Everything that crosses a crate boundary lives here: the normalized log
//! record produced by ingestion, alert rules and their fired instances,
//! notification channel descriptors, and the audit row written per delivery
//! attempt. Time-window parsing for rule evaluation is in [`window`].

pub mod types;
pub mod window;
