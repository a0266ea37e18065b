use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Handler;
use crate::errors::HandlerError;
use crate::message::Message;

/// Envelope SNS wraps around a payload delivered to an SQS subscription.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsNotification {
    #[serde(rename = "Type")]
    pub notification_type: String,
    pub message_id: String,
    pub topic_arn: String,
    pub message: String,
    pub timestamp: String,
}

/// Event carried inside an [`SnsNotification`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsEvent {
    #[serde(rename = "Type")]
    pub event_type: String,
    pub body: String,
    pub message_id: String,
}

/// Decodes SNS notifications and logs the event they carry.
#[derive(Debug, Clone)]
pub struct SnsEnvelopeHandler {
    name: String,
}

impl SnsEnvelopeHandler {
    pub fn new(name: impl Into<String>) -> Self {
        SnsEnvelopeHandler { name: name.into() }
    }

    fn decode(body: &str) -> Result<(SnsNotification, SnsEvent), HandlerError> {
        let notification: SnsNotification = serde_json::from_str(body).map_err(|e| {
            HandlerError::rejected(format!("unable to decode notification with body {body}: {e}"))
        })?;
        let event: SnsEvent = serde_json::from_str(&notification.message).map_err(|e| {
            HandlerError::rejected(format!(
                "unable to decode event with body {}: {e}",
                notification.message
            ))
        })?;

        Ok((notification, event))
    }
}

#[async_trait]
impl Handler for SnsEnvelopeHandler {
    async fn handle(&self, message: &Message, _cancel: &CancellationToken) -> Result<(), HandlerError> {
        let (notification, event) = Self::decode(message.body())?;

        info!(
            handler = %self.name,
            message_id = %message.id(),
            topic_arn = %notification.topic_arn,
            event_type = %event.event_type,
            event_body = %event.body,
            original_message_id = %event.message_id,
            "Received event"
        );

        Ok(())
    }
}
