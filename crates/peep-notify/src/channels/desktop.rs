use crate::error::{NotifyError, Result};
use crate::message::AlertMessage;
use tokio::process::Command;

/// Best-effort platform notifier. On failure the alert still lands on the
/// process's diagnostic stream, and the attempt is recorded as failed.
pub async fn send(message: &AlertMessage) -> Result<()> {
    let summary = format!(
        "Threshold exceeded: {} events (limit: {})",
        message.count, message.threshold
    );
    if let Err(e) = notify_os(&message.title, &summary).await {
        eprintln!("ALERT: {} - {summary}", message.title);
        return Err(e);
    }
    Ok(())
}

#[cfg(target_os = "linux")]
async fn notify_os(title: &str, body: &str) -> Result<()> {
    run_notifier(Command::new("notify-send").arg(title).arg(body)).await
}

#[cfg(target_os = "macos")]
async fn notify_os(title: &str, body: &str) -> Result<()> {
    let script = format!(
        "display notification {} with title {}",
        applescript_quote(body),
        applescript_quote(title)
    );
    run_notifier(Command::new("osascript").arg("-e").arg(script)).await
}

#[cfg(target_os = "macos")]
fn applescript_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(target_os = "windows")]
async fn notify_os(title: &str, body: &str) -> Result<()> {
    let script = format!(
        "New-BurntToastNotification -Text '{}', '{}'",
        title.replace('\'', "''"),
        body.replace('\'', "''")
    );
    run_notifier(Command::new("powershell").arg("-Command").arg(script)).await
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
async fn notify_os(_title: &str, _body: &str) -> Result<()> {
    Err(NotifyError::Desktop(format!(
        "desktop notifications not supported on {}",
        std::env::consts::OS
    )))
}

#[allow(dead_code)]
async fn run_notifier(cmd: &mut Command) -> Result<()> {
    let status = cmd
        .status()
        .await
        .map_err(|e| NotifyError::Desktop(e.to_string()))?;
    if !status.success() {
        return Err(NotifyError::Desktop(format!(
            "notifier exited with {status}"
        )));
    }
    Ok(())
}
