use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Handler;
use crate::errors::HandlerError;
use crate::message::Message;

/// Logs every message body and rejects bodies containing a failure marker.
#[derive(Debug, Clone)]
pub struct LogHandler {
    name: String,
    failure_marker: Option<String>,
}

impl LogHandler {
    pub fn new(name: impl Into<String>) -> Self {
        LogHandler {
            name: name.into(),
            failure_marker: None,
        }
    }

    pub fn with_failure_marker(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = Some(marker.into());
        self
    }
}

#[async_trait]
impl Handler for LogHandler {
    async fn handle(&self, message: &Message, _cancel: &CancellationToken) -> Result<(), HandlerError> {
        info!(handler = %self.name, message_id = %message.id(), body = %message.body(), "Received message");

        match &self.failure_marker {
            Some(marker) if message.body().contains(marker.as_str()) => Err(HandlerError::rejected(
                format!("could not handle message {}", message.id()),
            )),
            _ => Ok(()),
        }
    }
}
