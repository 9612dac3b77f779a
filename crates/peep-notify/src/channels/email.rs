use crate::channel::EmailConfig;
use crate::error::{NotifyError, Result};
use crate::message::AlertMessage;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Submit the alert as a plain-text email to every configured recipient.
pub async fn send(config: &EmailConfig, message: &AlertMessage) -> Result<()> {
    let builder = if config.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
    };
    let transport = builder
        .port(config.smtp_port)
        .credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ))
        .timeout(Some(SEND_TIMEOUT))
        .build();

    let from = from_mailbox(config)?;
    let subject = format!("[{}] {}", message.severity, message.title);

    let mut email = Message::builder().from(from).subject(subject);
    for recipient in &config.to_emails {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| NotifyError::InvalidConfig(format!("bad recipient '{recipient}': {e}")))?;
        email = email.to(to);
    }
    let email = email
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())
        .map_err(|e| NotifyError::Smtp(e.to_string()))?;

    transport
        .send(email)
        .await
        .map_err(|e| NotifyError::Smtp(e.to_string()))?;
    Ok(())
}

fn from_mailbox(config: &EmailConfig) -> Result<Mailbox> {
    let raw = match &config.from_name {
        Some(name) => format!("{name} <{}>", config.from_email),
        None => config.from_email.clone(),
    };
    raw.parse()
        .map_err(|e| NotifyError::InvalidConfig(format!("bad from address '{raw}': {e}")))
}
