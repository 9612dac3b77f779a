use crate::channel::WebhookConfig;
use crate::error::{NotifyError, Result};
use crate::message::AlertMessage;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// POST the structured payload to the configured URL. Success iff the
/// endpoint answers 200.
pub async fn send(config: &WebhookConfig, message: &AlertMessage) -> Result<()> {
    let payload = build_payload(config, message);
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    let response = client.post(&config.url).json(&payload).send().await?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(NotifyError::WebhookStatus {
            status: status.as_u16(),
            body: truncate(&body, 200),
        });
    }
    Ok(())
}

pub(crate) fn build_payload(config: &WebhookConfig, message: &AlertMessage) -> Value {
    let mut payload = serde_json::json!({
        "username": "peep",
        "icon_emoji": ":rotating_light:",
        "attachments": [{
            "color": message.ratio_color(),
            "title": message.title,
            "text": message.body,
            "fields": [
                { "title": "Count", "value": message.count.to_string(), "short": true },
                { "title": "Threshold", "value": message.threshold.to_string(), "short": true },
                { "title": "Severity", "value": message.ratio_label(), "short": true },
            ],
            "footer": "peep observability",
            "ts": message.fired_at.timestamp(),
            "mrkdwn_in": ["text", "fields"],
        }],
    });
    if let Some(channel) = &config.channel {
        payload["channel"] = Value::String(channel.clone());
    }
    payload
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}
