use crate::error::{Result, StorageError};
use chrono::{DateTime, Timelike, Utc};
use peep_common::types::{
    format_sql_datetime, parse_sql_datetime, AlertInstance, AlertRule, ChannelKind, LogRecord,
    NewAlertRule, NewLogRecord, NewNotificationChannel, NotificationAttempt, NotificationChannel,
};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp DATETIME NOT NULL,
    level TEXT NOT NULL DEFAULT '',
    message TEXT NOT NULL DEFAULT '',
    service TEXT NOT NULL DEFAULT '',
    context TEXT NOT NULL DEFAULT '',
    raw_log TEXT NOT NULL DEFAULT '',
    created_at DATETIME NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
CREATE INDEX IF NOT EXISTS idx_logs_service ON logs(service);

CREATE TABLE IF NOT EXISTS alert_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    query TEXT NOT NULL,
    threshold INTEGER NOT NULL DEFAULT 1,
    window TEXT NOT NULL DEFAULT '5m',
    enabled BOOLEAN NOT NULL DEFAULT 1,
    created_at DATETIME NOT NULL,
    last_check DATETIME,
    last_alert DATETIME
);

CREATE TABLE IF NOT EXISTS alert_instances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id INTEGER NOT NULL,
    rule_name TEXT NOT NULL,
    count INTEGER NOT NULL,
    threshold INTEGER NOT NULL,
    query TEXT NOT NULL,
    fired_at DATETIME NOT NULL,
    resolved BOOLEAN NOT NULL DEFAULT 0,
    FOREIGN KEY (rule_id) REFERENCES alert_rules (id)
);
CREATE INDEX IF NOT EXISTS idx_alert_instances_rule_id ON alert_instances(rule_id);
CREATE INDEX IF NOT EXISTS idx_alert_instances_fired_at ON alert_instances(fired_at);

CREATE TABLE IF NOT EXISTS notification_channels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    enabled BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS alert_notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id INTEGER NOT NULL,
    channel_id INTEGER NOT NULL,
    sent_at DATETIME NOT NULL,
    success BOOLEAN NOT NULL,
    error_message TEXT,
    FOREIGN KEY (alert_id) REFERENCES alert_instances (id),
    FOREIGN KEY (channel_id) REFERENCES notification_channels (id)
);
";

/// Single-file SQLite store. Writes are serialized through the connection
/// mutex; WAL mode lets the UI collaborator read concurrently.
pub struct Store {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`. Schema bootstrap is
    /// idempotent: re-opening an existing file never alters data.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (used by tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned mutex if necessary.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── logs ──

    pub fn insert_log(&self, record: &NewLogRecord) -> Result<i64> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO logs (timestamp, level, message, service, context, raw_log, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                format_sql_datetime(record.timestamp),
                record.level,
                record.message,
                record.service,
                record.context,
                record.raw_log,
                format_sql_datetime(Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_logs(&self, limit: i64) -> Result<Vec<LogRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, level, message, service, context, raw_log, created_at
             FROM logs ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let timestamp: String = row.get(1)?;
            let created_at: String = row.get(7)?;
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: parse_sql_datetime(&timestamp).unwrap_or_default(),
                level: row.get(2)?,
                message: row.get(3)?,
                service: row.get(4)?,
                context: row.get(5)?,
                raw_log: row.get(6)?,
                created_at: parse_sql_datetime(&created_at).unwrap_or_default(),
            })
        })?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }

    pub fn count_logs(&self) -> Result<i64> {
        let conn = self.lock_conn();
        let count = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<i64> {
        let conn = self.lock_conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM logs WHERE timestamp < ?1",
            params![format_sql_datetime(cutoff)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── scalar evaluation ──

    /// Run a read-only rule query and return its single scalar value.
    ///
    /// Fails when the result has more than one column, no rows, or more
    /// than one row; the alert engine treats any of those as a broken rule.
    pub fn run_scalar(&self, sql: &str) -> Result<i64> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        if columns != 1 {
            return Err(StorageError::ScalarShape(format!(
                "expected 1 column, query returns {columns}"
            )));
        }
        let mut rows = stmt.query([])?;
        let row = rows
            .next()?
            .ok_or_else(|| StorageError::ScalarShape("query returned no rows".into()))?;
        let value: i64 = row.get(0)?;
        if rows.next()?.is_some() {
            return Err(StorageError::ScalarShape(
                "query returned more than one row".into(),
            ));
        }
        Ok(value)
    }

    // ── alert rules ──

    pub fn insert_rule(&self, rule: &NewAlertRule) -> Result<AlertRule> {
        // Truncate to whole seconds so the returned value equals what a
        // later load parses back from the DATETIME column.
        let now = Utc::now();
        let created_at = now.with_nanosecond(0).unwrap_or(now);
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO alert_rules (name, description, query, threshold, window, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.name,
                rule.description,
                rule.query,
                rule.threshold,
                rule.window,
                rule.enabled,
                format_sql_datetime(created_at),
            ],
        )?;
        Ok(AlertRule {
            id: conn.last_insert_rowid(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            query: rule.query.clone(),
            threshold: rule.threshold,
            window: rule.window.clone(),
            enabled: rule.enabled,
            created_at,
            last_check: None,
            last_alert: None,
        })
    }

    pub fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, description, query, threshold, window, enabled,
                    created_at, last_check, last_alert
             FROM alert_rules ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let created_at: String = row.get(7)?;
            let last_check: Option<String> = row.get(8)?;
            let last_alert: Option<String> = row.get(9)?;
            Ok(AlertRule {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                query: row.get(3)?,
                threshold: row.get(4)?,
                window: row.get(5)?,
                enabled: row.get(6)?,
                created_at: parse_sql_datetime(&created_at).unwrap_or_default(),
                last_check: last_check.as_deref().and_then(parse_sql_datetime),
                last_alert: last_alert.as_deref().and_then(parse_sql_datetime),
            })
        })?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row?);
        }
        Ok(rules)
    }

    pub fn update_rule_check_time(&self, rule_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE alert_rules SET last_check = ?1 WHERE id = ?2",
            params![format_sql_datetime(at), rule_id],
        )?;
        Ok(())
    }

    pub fn update_rule_fire_time(&self, rule_id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE alert_rules SET last_alert = ?1 WHERE id = ?2",
            params![format_sql_datetime(at), rule_id],
        )?;
        Ok(())
    }

    pub fn set_rule_enabled(&self, rule_id: i64, enabled: bool) -> Result<bool> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE alert_rules SET enabled = ?1 WHERE id = ?2",
            params![enabled, rule_id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_rule(&self, rule_id: i64) -> Result<bool> {
        let conn = self.lock_conn();
        let deleted = conn.execute("DELETE FROM alert_rules WHERE id = ?1", params![rule_id])?;
        Ok(deleted > 0)
    }

    // ── notification channels ──

    pub fn insert_channel(&self, channel: &NewNotificationChannel) -> Result<NotificationChannel> {
        let config_json = serde_json::to_string(&channel.config)?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO notification_channels (name, type, config, enabled)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                channel.name,
                channel.kind.to_string(),
                config_json,
                channel.enabled
            ],
        )?;
        Ok(NotificationChannel {
            id: conn.last_insert_rowid(),
            name: channel.name.clone(),
            kind: channel.kind,
            config: channel.config.clone(),
            enabled: channel.enabled,
        })
    }

    pub fn list_channels(&self) -> Result<Vec<NotificationChannel>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, type, config, enabled FROM notification_channels ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(2)?;
            let config_json: String = row.get(3)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                kind,
                config_json,
                row.get::<_, bool>(4)?,
            ))
        })?;
        let mut channels = Vec::new();
        for row in rows {
            let (id, name, kind, config_json, enabled) = row?;
            // A channel with an unknown kind or mangled config is kept but
            // cannot be dispatched to; the engine disables it at load.
            let kind = ChannelKind::from_str(&kind).unwrap_or(ChannelKind::Desktop);
            let config: HashMap<String, String> =
                serde_json::from_str(&config_json).unwrap_or_default();
            channels.push(NotificationChannel {
                id,
                name,
                kind,
                config,
                enabled,
            });
        }
        Ok(channels)
    }

    pub fn delete_channel(&self, channel_id: i64) -> Result<bool> {
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM notification_channels WHERE id = ?1",
            params![channel_id],
        )?;
        Ok(deleted > 0)
    }

    // ── alert instances & notification audit ──

    pub fn insert_alert_instance(&self, instance: &AlertInstance) -> Result<i64> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO alert_instances (rule_id, rule_name, count, threshold, query, fired_at, resolved)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                instance.rule_id,
                instance.rule_name,
                instance.count,
                instance.threshold,
                instance.query,
                format_sql_datetime(instance.fired_at),
                instance.resolved,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_alert_instances(&self, limit: i64) -> Result<Vec<AlertInstance>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, rule_id, rule_name, count, threshold, query, fired_at, resolved
             FROM alert_instances ORDER BY fired_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let fired_at: String = row.get(6)?;
            Ok(AlertInstance {
                id: row.get(0)?,
                rule_id: row.get(1)?,
                rule_name: row.get(2)?,
                count: row.get(3)?,
                threshold: row.get(4)?,
                query: row.get(5)?,
                fired_at: parse_sql_datetime(&fired_at).unwrap_or_default(),
                resolved: row.get(7)?,
            })
        })?;
        let mut instances = Vec::new();
        for row in rows {
            instances.push(row?);
        }
        Ok(instances)
    }

    /// Manual resolution hook for the UI collaborator; the engine itself
    /// never resolves instances. Returns true if the row was found.
    pub fn resolve_alert(&self, alert_id: i64) -> Result<bool> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE alert_instances SET resolved = 1 WHERE id = ?1",
            params![alert_id],
        )?;
        Ok(updated > 0)
    }

    pub fn insert_notification_attempt(
        &self,
        alert_id: i64,
        channel_id: i64,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO alert_notifications (alert_id, channel_id, sent_at, success, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                alert_id,
                channel_id,
                format_sql_datetime(Utc::now()),
                success,
                error_message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn attempts_for_alert(&self, alert_id: i64) -> Result<Vec<NotificationAttempt>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, alert_id, channel_id, sent_at, success, error_message
             FROM alert_notifications WHERE alert_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![alert_id], |row| {
            let sent_at: String = row.get(3)?;
            Ok(NotificationAttempt {
                id: row.get(0)?,
                alert_id: row.get(1)?,
                channel_id: row.get(2)?,
                sent_at: parse_sql_datetime(&sent_at).unwrap_or_default(),
                success: row.get(4)?,
                error_message: row.get(5)?,
            })
        })?;
        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row?);
        }
        Ok(attempts)
    }

    // ── retention primitives ──

    /// Delete the oldest rows by `timestamp` until at most `keep_last_n`
    /// remain. Returns the number of deleted rows.
    pub fn delete_oldest_by_count(&self, keep_last_n: i64) -> Result<usize> {
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM logs WHERE id NOT IN (
                 SELECT id FROM logs ORDER BY timestamp DESC, id DESC LIMIT ?1
             )",
            params![keep_last_n],
        )?;
        Ok(deleted)
    }

    /// Delete rows with `timestamp` strictly before `cutoff`.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM logs WHERE timestamp < ?1",
            params![format_sql_datetime(cutoff)],
        )?;
        Ok(deleted)
    }

    /// Reclaim space after bulk deletes. Best-effort at call sites.
    pub fn compact(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Actual on-disk footprint (db + WAL + SHM). Zero for in-memory stores.
    pub fn storage_bytes(&self) -> Result<u64> {
        let Some(path) = &self.path else {
            return Ok(0);
        };
        let mut total = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        for suffix in ["-wal", "-shm"] {
            let mut aux = path.as_os_str().to_owned();
            aux.push(suffix);
            if let Ok(meta) = std::fs::metadata(PathBuf::from(aux)) {
                total += meta.len();
            }
        }
        Ok(total)
    }
}
