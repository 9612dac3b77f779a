use crate::channel::ScriptConfig;
use crate::error::{NotifyError, Result};
use crate::message::AlertMessage;
use std::process::Stdio;
use tokio::process::Command;

/// Execute the configured script with the alert injected as environment
/// variables. Success iff exit code 0; the child is killed on timeout.
pub async fn send(config: &ScriptConfig, message: &AlertMessage) -> Result<()> {
    validate_script(&config.path)?;

    let mut cmd = Command::new(&config.path);
    cmd.args(&config.args)
        .env("PEEP_ALERT_TITLE", &message.title)
        .env("PEEP_ALERT_MESSAGE", &message.body)
        .env("PEEP_ALERT_SEVERITY", message.severity.to_string())
        .env("PEEP_ALERT_COUNT", message.count.to_string())
        .env("PEEP_ALERT_THRESHOLD", message.threshold.to_string())
        .env("PEEP_ALERT_RATIO", format!("{:.2}", message.ratio))
        .env("PEEP_ALERT_TIMESTAMP", message.fired_at.to_rfc3339())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| NotifyError::Script(format!("failed to start '{}': {e}", config.path)))?;

    match tokio::time::timeout(config.timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(NotifyError::Script(format!(
            "'{}' exited with {status}",
            config.path
        ))),
        Ok(Err(e)) => Err(NotifyError::Script(format!(
            "failed to wait for '{}': {e}",
            config.path
        ))),
        Err(_) => {
            let _ = child.kill().await;
            Err(NotifyError::Script(format!(
                "'{}' timed out after {:?}",
                config.path, config.timeout
            )))
        }
    }
}

fn validate_script(path: &str) -> Result<()> {
    let meta = std::fs::metadata(path)
        .map_err(|e| NotifyError::Script(format!("cannot access script '{path}': {e}")))?;
    if !meta.is_file() {
        return Err(NotifyError::Script(format!(
            "script path is not a regular file: {path}"
        )));
    }
    Ok(())
}
