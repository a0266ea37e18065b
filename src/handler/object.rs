use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Handler;
use crate::errors::HandlerError;
use crate::message::Message;
use crate::publish::{Event, Publisher};
use crate::store::ObjectStore;

struct EventTarget {
    publisher: Arc<dyn Publisher>,
    topic: String,
    event_type: String,
}

/// Treats the message body as an object key.
///
/// The object is fetched and inspected; if its content carries the failure
/// marker the message is rejected and the object kept. Otherwise the object
/// is deleted and, when a topic is configured, an [`Event`] is published.
pub struct ObjectStoreHandler {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    failure_marker: String,
    events: Option<EventTarget>,
}

impl ObjectStoreHandler {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, failure_marker: impl Into<String>) -> Self {
        ObjectStoreHandler {
            store,
            bucket: bucket.into(),
            failure_marker: failure_marker.into(),
            events: None,
        }
    }

    /// Publishes an event of `event_type` to `topic` after each processed object.
    pub fn with_events(
        mut self,
        publisher: Arc<dyn Publisher>,
        topic: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        self.events = Some(EventTarget {
            publisher,
            topic: topic.into(),
            event_type: event_type.into(),
        });
        self
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), HandlerError> {
    if cancel.is_cancelled() {
        return Err(HandlerError::Cancelled);
    }
    Ok(())
}

#[async_trait]
impl Handler for ObjectStoreHandler {
    async fn handle(&self, message: &Message, cancel: &CancellationToken) -> Result<(), HandlerError> {
        let key = message.body();

        ensure_active(cancel)?;
        let content = self
            .store
            .get_object(&self.bucket, key)
            .await
            .map_err(|e| HandlerError::external("GetObject", e))?;

        if String::from_utf8_lossy(&content).contains(self.failure_marker.as_str()) {
            return Err(HandlerError::rejected(format!(
                "object {key} in {} contains failure marker",
                self.bucket
            )));
        }

        ensure_active(cancel)?;
        self.store
            .delete_object(&self.bucket, key)
            .await
            .map_err(|e| HandlerError::external("DeleteObject", e))?;
        debug!(message_id = %message.id(), bucket = %self.bucket, key = %key, "Deleted object");

        if let Some(target) = &self.events {
            ensure_active(cancel)?;
            let event = Event {
                event_type: target.event_type.clone(),
                body: key.to_string(),
                message_id: message.id().to_string(),
            };
            let payload = serde_json::to_string(&event)
                .map_err(|e| HandlerError::Unexpected(format!("failed to encode event: {e}")))?;
            target
                .publisher
                .publish(&target.topic, payload)
                .await
                .map_err(|e| HandlerError::external("Publish", e))?;
            info!(message_id = %message.id(), topic = %target.topic, "Published event");
        }

        Ok(())
    }
}
