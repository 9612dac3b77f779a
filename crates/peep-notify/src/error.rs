/// Errors that can occur within the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a key required by its kind.
    #[error("Notify: {kind} channel missing required config key '{key}'")]
    MissingConfigKey { kind: &'static str, key: &'static str },

    /// Channel configuration has a present but unusable value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// An HTTP request to a webhook endpoint failed before a response.
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook endpoint answered with a non-200 status.
    #[error("Notify: webhook returned status {status}: {body}")]
    WebhookStatus { status: u16, body: String },

    /// SMTP transport or message construction error.
    #[error("Notify: SMTP error: {0}")]
    Smtp(String),

    /// Script execution failure (spawn error, non-zero exit, timeout).
    #[error("Notify: script error: {0}")]
    Script(String),

    /// The platform notifier was unavailable or rejected the message.
    #[error("Notify: desktop notification failed: {0}")]
    Desktop(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
