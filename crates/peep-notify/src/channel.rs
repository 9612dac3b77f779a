//! Parsing of persisted `(kind, config map)` pairs into ready-to-send
//! transports. The required-key table lives here so that add-time
//! validation in the engine and load-time validation agree by construction.

use crate::channels;
use crate::error::{NotifyError, Result};
use crate::message::AlertMessage;
use peep_common::types::{ChannelKind, NotificationChannel};
use peep_common::window::parse_duration;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Required config keys per channel kind.
pub fn required_keys(kind: ChannelKind) -> &'static [&'static str] {
    match kind {
        ChannelKind::Desktop => &[],
        ChannelKind::Webhook => &["webhook_url"],
        ChannelKind::Email => &[
            "smtp_host",
            "username",
            "password",
            "from_email",
            "to_emails",
        ],
        ChannelKind::Script => &["script_path"],
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Optional destination override carried into the payload.
    pub channel: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_emails: Vec<String>,
    pub use_tls: bool,
}

#[derive(Debug, Clone)]
pub struct ScriptConfig {
    pub path: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// One variant per channel kind, parsed from the persisted string map.
#[derive(Debug, Clone)]
pub enum ChannelTransport {
    Desktop,
    Webhook(WebhookConfig),
    Email(EmailConfig),
    Script(ScriptConfig),
}

impl ChannelTransport {
    /// Build the transport for a channel, validating required keys.
    pub fn from_channel(channel: &NotificationChannel) -> Result<Self> {
        let config = &channel.config;
        for &key in required_keys(channel.kind) {
            match config.get(key) {
                Some(value) if !value.trim().is_empty() => {}
                _ => {
                    return Err(NotifyError::MissingConfigKey {
                        kind: kind_str(channel.kind),
                        key,
                    })
                }
            }
        }

        match channel.kind {
            ChannelKind::Desktop => Ok(ChannelTransport::Desktop),
            ChannelKind::Webhook => Ok(ChannelTransport::Webhook(WebhookConfig {
                url: config["webhook_url"].clone(),
                channel: config.get("channel").cloned(),
            })),
            ChannelKind::Email => Ok(ChannelTransport::Email(parse_email(config)?)),
            ChannelKind::Script => Ok(ChannelTransport::Script(parse_script(config))),
        }
    }

    /// Deliver the message through this transport.
    pub async fn send(&self, message: &AlertMessage) -> Result<()> {
        match self {
            ChannelTransport::Desktop => channels::desktop::send(message).await,
            ChannelTransport::Webhook(config) => channels::webhook::send(config, message).await,
            ChannelTransport::Email(config) => channels::email::send(config, message).await,
            ChannelTransport::Script(config) => channels::script::send(config, message).await,
        }
    }
}

fn kind_str(kind: ChannelKind) -> &'static str {
    match kind {
        ChannelKind::Desktop => "desktop",
        ChannelKind::Webhook => "webhook",
        ChannelKind::Email => "email",
        ChannelKind::Script => "script",
    }
}

fn parse_email(config: &HashMap<String, String>) -> Result<EmailConfig> {
    let smtp_port = match config.get("smtp_port") {
        Some(port) => port.trim().parse::<u16>().map_err(|_| {
            NotifyError::InvalidConfig(format!("smtp_port is not a port number: '{port}'"))
        })?,
        None => DEFAULT_SMTP_PORT,
    };

    let to_emails: Vec<String> = config["to_emails"]
        .split(',')
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .collect();
    if to_emails.is_empty() {
        return Err(NotifyError::InvalidConfig(
            "to_emails contains no addresses".into(),
        ));
    }

    let use_tls = config
        .get("use_tls")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    Ok(EmailConfig {
        smtp_host: config["smtp_host"].clone(),
        smtp_port,
        username: config["username"].clone(),
        password: config["password"].clone(),
        from_email: config["from_email"].clone(),
        from_name: config.get("from_name").cloned(),
        to_emails,
        use_tls,
    })
}

fn parse_script(config: &HashMap<String, String>) -> ScriptConfig {
    let args = config
        .get("args")
        .map(|s| {
            s.split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let timeout = config
        .get("timeout")
        .and_then(|s| parse_duration(s))
        .and_then(|d| d.to_std().ok())
        .unwrap_or(DEFAULT_SCRIPT_TIMEOUT);

    let env = config
        .get("environment")
        .map(|s| {
            s.split(',')
                .filter_map(|pair| {
                    pair.trim()
                        .split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    ScriptConfig {
        path: config["script_path"].clone(),
        args,
        timeout,
        working_dir: config.get("working_dir").map(PathBuf::from),
        env,
    }
}
