//! Thin ingest front-end: reads normalized records (newline-delimited
//! JSON, the parser's output contract) and appends them to the store.

use chrono::{DateTime, Utc};
use peep_common::types::NewLogRecord;
use peep_storage::retention::RetentionManager;
use peep_storage::Store;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// A normalized record on the wire. Only `timestamp` is optional: when the
/// upstream parser could not extract one, ingestion substitutes its own
/// wall-clock so the stored column is never null.
#[derive(Debug, Deserialize)]
pub struct IngestRecord {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub raw_log: String,
}

impl IngestRecord {
    pub fn into_log(self) -> NewLogRecord {
        NewLogRecord {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            level: self.level,
            message: self.message,
            service: self.service,
            context: self.context,
            raw_log: self.raw_log,
        }
    }
}

/// Consume stdin until EOF or shutdown. Every `sweep_every` records the
/// retention manager is poked for an eager sweep (0 disables).
pub async fn run_stdin(
    store: Arc<Store>,
    retention: Arc<RetentionManager>,
    sweep_every: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ingested: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<IngestRecord>(&line) {
                            Ok(record) => {
                                if let Err(e) = store.insert_log(&record.into_log()) {
                                    tracing::error!(error = %e, "Failed to insert log record");
                                    continue;
                                }
                                ingested += 1;
                                if sweep_every > 0 && ingested % sweep_every == 0 {
                                    retention.trigger_now();
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Skipping malformed ingest line");
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!(ingested, "Ingest stream closed");
                        return;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Ingest read failed");
                        return;
                    }
                }
            }
            _ = shutdown.changed() => {
                tracing::info!(ingested, "Ingest stopping");
                return;
            }
        }
    }
}
