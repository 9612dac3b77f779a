use chrono::Duration;
use peep_alert::engine::EngineConfig;
use peep_storage::retention::RetentionConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub retention: RetentionSection,
    #[serde(default)]
    pub ingest: IngestSection,
}

#[derive(Debug, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Minimum seconds between consecutive alerts of one rule; 0 fires on
    /// every over-threshold tick.
    #[serde(default)]
    pub cooldown_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RetentionSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_logs")]
    pub max_logs: i64,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: f64,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct IngestSection {
    /// Read newline-delimited JSON records from stdin.
    #[serde(default = "default_true")]
    pub stdin: bool,
    /// Poke the retention manager every N ingested records; 0 disables the
    /// eager sweep.
    #[serde(default)]
    pub sweep_every: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            cooldown_secs: 0,
        }
    }
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_logs: default_max_logs(),
            max_age_days: default_max_age_days(),
            max_size_mb: default_max_size_mb(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            stdin: true,
            sweep_every: 0,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            engine: EngineSection::default(),
            retention: RetentionSection::default(),
            ingest: IngestSection::default(),
        }
    }
}

fn default_db_path() -> String {
    "peep.db".to_string()
}

fn default_tick_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_max_logs() -> i64 {
    100_000
}

fn default_max_age_days() -> i64 {
    30
}

fn default_max_size_mb() -> f64 {
    500.0
}

fn default_check_interval_secs() -> u64 {
    600
}

impl DaemonConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the config file, falling back to defaults when it is absent.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            tracing::info!(path, "No config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tick_secs: self.engine.tick_secs,
            cooldown_secs: self.engine.cooldown_secs,
        }
    }

    pub fn retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            max_logs: self.retention.max_logs,
            max_age: Duration::days(self.retention.max_age_days),
            max_size_mb: self.retention.max_size_mb,
            check_interval: std::time::Duration::from_secs(self.retention.check_interval_secs),
            enabled: self.retention.enabled,
        }
    }
}
