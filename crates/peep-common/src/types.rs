use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timestamp format used for every DATETIME column in the store.
///
/// All timestamps are UTC end to end; this format sorts lexicographically,
/// so rule SQL can compare `timestamp` columns against formatted cutoffs
/// directly.
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_sql_datetime(ts: DateTime<Utc>) -> String {
    ts.format(SQL_DATETIME_FORMAT).to_string()
}

pub fn parse_sql_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, SQL_DATETIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// A normalized log line as persisted in the `logs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    /// Event time (UTC). Never null: ingestion substitutes its own
    /// wall-clock when the source did not provide one.
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub service: String,
    /// Opaque structured payload, carried as a JSON string.
    pub context: String,
    /// Original line, preserved verbatim.
    pub raw_log: String,
    pub created_at: DateTime<Utc>,
}

/// Fields of a log record prior to insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
    pub service: String,
    pub context: String,
    pub raw_log: String,
}

/// A SQL-based alert rule: a scalar count query plus a firing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Read-only query returning a single scalar count.
    pub query: String,
    /// Fires when `count >= threshold`.
    pub threshold: i64,
    /// Trailing evaluation window, e.g. `"30s"`, `"5m"`, `"1h"`.
    pub window: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_alert: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    pub description: String,
    pub query: String,
    pub threshold: i64,
    pub window: String,
    pub enabled: bool,
}

/// One firing of a rule. Immutable after insert except for `resolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub id: i64,
    pub rule_id: i64,
    pub rule_name: String,
    pub count: i64,
    pub threshold: i64,
    pub query: String,
    pub fired_at: DateTime<Utc>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Desktop,
    Webhook,
    Email,
    Script,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Desktop => write!(f, "desktop"),
            ChannelKind::Webhook => write!(f, "webhook"),
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Script => write!(f, "script"),
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "desktop" => Ok(ChannelKind::Desktop),
            "webhook" => Ok(ChannelKind::Webhook),
            "email" => Ok(ChannelKind::Email),
            "script" => Ok(ChannelKind::Script),
            _ => Err(format!("unknown channel kind: {s}")),
        }
    }
}

/// A named notification sink. `config` keys depend on the kind; validation
/// happens when the channel is added or loaded, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub name: String,
    pub kind: ChannelKind,
    pub config: HashMap<String, String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotificationChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub config: HashMap<String, String>,
    pub enabled: bool,
}

/// Audit row for one delivery attempt. Exactly one per dispatcher call,
/// success or not; never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub id: i64,
    pub alert_id: i64,
    pub channel_id: i64,
    pub sent_at: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}
