use crate::channel::{required_keys, ChannelTransport};
use crate::channels::webhook::build_payload;
use crate::dispatch::dispatch;
use crate::error::NotifyError;
use crate::message::AlertMessage;
use chrono::Utc;
use peep_common::types::{AlertInstance, ChannelKind, NotificationChannel, Severity};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn make_instance(count: i64, threshold: i64) -> AlertInstance {
    AlertInstance {
        id: 1,
        rule_id: 1,
        rule_name: "error spike".to_string(),
        count,
        threshold,
        query: "SELECT COUNT(*) FROM logs WHERE level='error'".to_string(),
        fired_at: Utc::now(),
        resolved: false,
    }
}

fn make_channel(kind: ChannelKind, config: &[(&str, &str)]) -> NotificationChannel {
    NotificationChannel {
        id: 7,
        name: "test channel".to_string(),
        kind,
        config: config
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        enabled: true,
    }
}

/// One-shot HTTP collector: accepts a single request, hands its body back,
/// and answers with the given status line.
async fn spawn_collector(
    status_line: &'static str,
) -> (String, tokio::sync::oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let body = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                let body_start = header_end + 4;
                if buf.len() >= body_start + content_length {
                    break String::from_utf8_lossy(&buf[body_start..body_start + content_length])
                        .to_string();
                }
            }
        };
        let response = format!("{status_line}\r\ncontent-length: 0\r\n\r\n");
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = tx.send(body);
    });
    (format!("http://{addr}/hook"), rx)
}

// ── message synthesis ──

#[test]
fn message_fields_are_synthesized() {
    let instance = make_instance(5, 3);
    let message = AlertMessage::from_instance(&instance);
    assert_eq!(message.title, "Alert: error spike");
    assert!(message.body.contains("error spike"));
    assert!(message.body.contains(&instance.query));
    assert!(message.body.contains("Count: 5"));
    assert!(message.body.contains("Threshold: 3"));
    assert!((message.ratio - 5.0 / 3.0).abs() < 1e-9);
}

#[test]
fn severity_is_critical_at_twice_threshold() {
    assert_eq!(
        AlertMessage::from_instance(&make_instance(6, 3)).severity,
        Severity::Critical
    );
    assert_eq!(
        AlertMessage::from_instance(&make_instance(5, 3)).severity,
        Severity::Warning
    );
    assert_eq!(
        AlertMessage::from_instance(&make_instance(3, 3)).severity,
        Severity::Warning
    );
}

#[test]
fn ratio_ladder_maps_colors_and_labels() {
    let cases = [
        (9, 3, "danger", "Critical"),
        (6, 3, "warning", "High"),
        (5, 3, "#ffcc00", "Medium"),
        (4, 3, "good", "Low"),
    ];
    for (count, threshold, color, label) in cases {
        let message = AlertMessage::from_instance(&make_instance(count, threshold));
        assert_eq!(message.ratio_color(), color, "count={count}");
        assert_eq!(message.ratio_label(), label, "count={count}");
    }
}

// ── channel config parsing ──

#[test]
fn required_keys_per_kind() {
    assert!(required_keys(ChannelKind::Desktop).is_empty());
    assert_eq!(required_keys(ChannelKind::Webhook), ["webhook_url"]);
    assert!(required_keys(ChannelKind::Email).contains(&"smtp_host"));
    assert!(required_keys(ChannelKind::Email).contains(&"to_emails"));
    assert_eq!(required_keys(ChannelKind::Script), ["script_path"]);
}

#[test]
fn missing_required_key_is_rejected() {
    let channel = make_channel(ChannelKind::Webhook, &[]);
    let err = ChannelTransport::from_channel(&channel).unwrap_err();
    assert!(
        matches!(
            err,
            NotifyError::MissingConfigKey {
                key: "webhook_url",
                ..
            }
        ),
        "{err}"
    );

    // A present-but-blank value counts as missing.
    let channel = make_channel(ChannelKind::Script, &[("script_path", "  ")]);
    assert!(ChannelTransport::from_channel(&channel).is_err());
}

#[test]
fn email_config_defaults() {
    let channel = make_channel(
        ChannelKind::Email,
        &[
            ("smtp_host", "smtp.example.com"),
            ("username", "alerts"),
            ("password", "hunter2"),
            ("from_email", "alerts@example.com"),
            ("to_emails", " ops@example.com , dev@example.com ,"),
        ],
    );
    let ChannelTransport::Email(config) = ChannelTransport::from_channel(&channel).unwrap() else {
        panic!("expected email transport");
    };
    assert_eq!(config.smtp_port, 587);
    assert!(config.use_tls);
    assert_eq!(config.to_emails, ["ops@example.com", "dev@example.com"]);
}

#[test]
fn email_config_overrides() {
    let channel = make_channel(
        ChannelKind::Email,
        &[
            ("smtp_host", "smtp.example.com"),
            ("smtp_port", "2525"),
            ("use_tls", "false"),
            ("username", "alerts"),
            ("password", "hunter2"),
            ("from_email", "alerts@example.com"),
            ("from_name", "Peep Alerts"),
            ("to_emails", "ops@example.com"),
        ],
    );
    let ChannelTransport::Email(config) = ChannelTransport::from_channel(&channel).unwrap() else {
        panic!("expected email transport");
    };
    assert_eq!(config.smtp_port, 2525);
    assert!(!config.use_tls);
    assert_eq!(config.from_name.as_deref(), Some("Peep Alerts"));

    let channel = make_channel(
        ChannelKind::Email,
        &[
            ("smtp_host", "smtp.example.com"),
            ("smtp_port", "not-a-port"),
            ("username", "alerts"),
            ("password", "hunter2"),
            ("from_email", "alerts@example.com"),
            ("to_emails", "ops@example.com"),
        ],
    );
    assert!(ChannelTransport::from_channel(&channel).is_err());
}

#[test]
fn script_config_parsing() {
    let channel = make_channel(
        ChannelKind::Script,
        &[
            ("script_path", "/opt/hooks/alert.sh"),
            ("args", "--page oncall"),
            ("timeout", "5s"),
            ("working_dir", "/opt/hooks"),
            ("environment", "TEAM=infra, REGION=eu-west-1"),
        ],
    );
    let ChannelTransport::Script(config) = ChannelTransport::from_channel(&channel).unwrap() else {
        panic!("expected script transport");
    };
    assert_eq!(config.args, ["--page", "oncall"]);
    assert_eq!(config.timeout, std::time::Duration::from_secs(5));
    assert_eq!(config.working_dir.as_deref().unwrap().to_str(), Some("/opt/hooks"));
    assert_eq!(
        config.env,
        [
            ("TEAM".to_string(), "infra".to_string()),
            ("REGION".to_string(), "eu-west-1".to_string())
        ]
    );

    // Unparsable timeout falls back to the 30s default.
    let channel = make_channel(
        ChannelKind::Script,
        &[("script_path", "/opt/hooks/alert.sh"), ("timeout", "soon")],
    );
    let ChannelTransport::Script(config) = ChannelTransport::from_channel(&channel).unwrap() else {
        panic!("expected script transport");
    };
    assert_eq!(config.timeout, std::time::Duration::from_secs(30));
}

// ── webhook payload & delivery ──

#[test]
fn webhook_payload_carries_alert_fields() {
    let message = AlertMessage::from_instance(&make_instance(9, 3));
    let config = crate::channel::WebhookConfig {
        url: "https://hooks.example.com/x".to_string(),
        channel: Some("#ops".to_string()),
    };
    let payload = build_payload(&config, &message);

    assert_eq!(payload["username"], "peep");
    assert_eq!(payload["channel"], "#ops");
    let attachment = &payload["attachments"][0];
    assert_eq!(attachment["color"], "danger");
    assert_eq!(attachment["title"], "Alert: error spike");
    let fields = attachment["fields"].as_array().unwrap();
    assert_eq!(fields[0]["value"], "9");
    assert_eq!(fields[1]["value"], "3");
    assert_eq!(fields[2]["value"], "Critical");
}

#[tokio::test]
async fn webhook_posts_payload_and_succeeds_on_200() {
    let (url, body_rx) = spawn_collector("HTTP/1.1 200 OK").await;
    let channel = make_channel(ChannelKind::Webhook, &[("webhook_url", url.as_str())]);
    let transport = ChannelTransport::from_channel(&channel).unwrap();
    let message = AlertMessage::from_instance(&make_instance(5, 3));

    transport.send(&message).await.unwrap();

    let body = body_rx.await.unwrap();
    assert!(body.contains("error spike"));
    assert!(body.contains("\"5\""));
    assert!(body.contains("\"3\""));
}

#[tokio::test]
async fn webhook_non_200_is_an_error() {
    let (url, _body_rx) = spawn_collector("HTTP/1.1 503 Service Unavailable").await;
    let channel = make_channel(ChannelKind::Webhook, &[("webhook_url", url.as_str())]);
    let transport = ChannelTransport::from_channel(&channel).unwrap();
    let message = AlertMessage::from_instance(&make_instance(5, 3));

    let err = transport.send(&message).await.unwrap_err();
    assert!(
        matches!(err, NotifyError::WebhookStatus { status: 503, .. }),
        "{err}"
    );
}

// ── script delivery (unix only: relies on /bin/sh and exec bits) ──

#[cfg(unix)]
fn write_script(dir: &std::path::Path, name: &str, contents: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_str().unwrap().to_string()
}

#[cfg(unix)]
#[tokio::test]
async fn script_receives_alert_environment() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = dir.path().join("out.txt");
    let script = write_script(
        dir.path(),
        "alert.sh",
        "#!/bin/sh\nprintf '%s %s %s %s %s' \"$PEEP_ALERT_COUNT\" \"$PEEP_ALERT_THRESHOLD\" \"$PEEP_ALERT_SEVERITY\" \"$PEEP_ALERT_RATIO\" \"$PEEP_EXTRA\" > \"$1\"\n",
    );
    let channel = make_channel(
        ChannelKind::Script,
        &[
            ("script_path", script.as_str()),
            ("args", out.to_str().unwrap()),
            ("environment", "PEEP_EXTRA=custom"),
        ],
    );
    let transport = ChannelTransport::from_channel(&channel).unwrap();
    let message = AlertMessage::from_instance(&make_instance(6, 3));

    transport.send(&message).await.unwrap();

    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written, "6 3 critical 2.00 custom");
}

#[cfg(unix)]
#[tokio::test]
async fn script_nonzero_exit_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = write_script(dir.path(), "fail.sh", "#!/bin/sh\nexit 3\n");
    let channel = make_channel(ChannelKind::Script, &[("script_path", script.as_str())]);
    let transport = ChannelTransport::from_channel(&channel).unwrap();
    let message = AlertMessage::from_instance(&make_instance(5, 3));

    let err = transport.send(&message).await.unwrap_err();
    assert!(err.to_string().contains("exited with"), "{err}");
}

#[cfg(unix)]
#[tokio::test]
async fn script_is_killed_on_timeout() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 60\n");
    let channel = make_channel(
        ChannelKind::Script,
        &[("script_path", script.as_str()), ("timeout", "1s")],
    );
    let transport = ChannelTransport::from_channel(&channel).unwrap();
    let message = AlertMessage::from_instance(&make_instance(5, 3));

    let started = std::time::Instant::now();
    let err = transport.send(&message).await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

#[cfg(unix)]
#[tokio::test]
async fn script_missing_file_is_an_error() {
    let channel = make_channel(
        ChannelKind::Script,
        &[("script_path", "/nonexistent/alert.sh")],
    );
    let transport = ChannelTransport::from_channel(&channel).unwrap();
    let message = AlertMessage::from_instance(&make_instance(5, 3));
    assert!(transport.send(&message).await.is_err());
}

// ── dispatcher audit contract ──

#[cfg(unix)]
#[tokio::test]
async fn dispatch_records_one_attempt_per_call() {
    use peep_common::types::NewNotificationChannel;

    let dir = tempfile::TempDir::new().unwrap();
    let store = peep_storage::Store::open(&dir.path().join("peep.db")).unwrap();
    let ok_script = write_script(dir.path(), "ok.sh", "#!/bin/sh\nexit 0\n");

    let good = store
        .insert_channel(&NewNotificationChannel {
            name: "good script".to_string(),
            kind: ChannelKind::Script,
            config: HashMap::from([("script_path".to_string(), ok_script.clone())]),
            enabled: true,
        })
        .unwrap();
    let bad = store
        .insert_channel(&NewNotificationChannel {
            name: "bad script".to_string(),
            kind: ChannelKind::Script,
            config: HashMap::new(),
            enabled: true,
        })
        .unwrap();

    let instance = make_instance(5, 3);
    assert!(dispatch(&store, &instance, &good).await);
    assert!(!dispatch(&store, &instance, &bad).await);

    let attempts = store.attempts_for_alert(instance.id).unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].channel_id, good.id);
    assert!(!attempts[1].success);
    assert!(attempts[1]
        .error_message
        .as_deref()
        .unwrap()
        .contains("script_path"));
}
