use crate::channel::ChannelTransport;
use crate::message::AlertMessage;
use peep_common::types::{AlertInstance, NotificationChannel};
use peep_storage::Store;

/// Deliver one alert instance through one channel and record the outcome.
///
/// Exactly one audit row is written per call, whatever happens: transport
/// parse failure, send failure, or success. Returns the success flag so the
/// caller can log fan-out totals.
pub async fn dispatch(
    store: &Store,
    instance: &AlertInstance,
    channel: &NotificationChannel,
) -> bool {
    let message = AlertMessage::from_instance(instance);
    let outcome = match ChannelTransport::from_channel(channel) {
        Ok(transport) => transport.send(&message).await,
        Err(e) => Err(e),
    };

    let (success, error_message) = match &outcome {
        Ok(()) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    match &outcome {
        Ok(()) => tracing::info!(
            channel = %channel.name,
            kind = %channel.kind,
            alert_id = instance.id,
            "Notification sent"
        ),
        Err(e) => tracing::error!(
            channel = %channel.name,
            kind = %channel.kind,
            alert_id = instance.id,
            error = %e,
            "Notification failed"
        ),
    }

    if let Err(e) = store.insert_notification_attempt(
        instance.id,
        channel.id,
        success,
        error_message.as_deref(),
    ) {
        tracing::error!(
            channel = %channel.name,
            alert_id = instance.id,
            error = %e,
            "Failed to record notification attempt"
        );
    }

    success
}
