//! Notification dispatch for fired alerts.
//!
//! An [`message::AlertMessage`] is synthesized once per alert instance and
//! delivered through the transport matching the channel's kind: desktop
//! notifier, webhook POST, SMTP email, or a user script. Every dispatcher
//! call records exactly one audit row in the store, success or not; there
//! are no retries at this layer.

pub mod channel;
pub mod channels;
pub mod dispatch;
pub mod error;
pub mod message;

#[cfg(test)]
mod tests;
