use std::collections::HashMap;
use std::fmt;

use tracing::warn;

/// Opaque handle returned with a received message.
///
/// Only the queue gateway interprets it: it is required to delete the
/// message or to change its visibility for this particular delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        ReceiptHandle(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single delivery of a queue message.
///
/// Messages are immutable once received. The dispatcher owns a message for
/// the duration of one processing attempt; afterwards it goes back to the
/// queue service, either by deletion or by visibility expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: String,
    body: String,
    receipt_handle: ReceiptHandle,
    attributes: HashMap<String, String>,
}

/// The messages returned by one receive call, in no particular order.
pub type Batch = Vec<Message>;

impl Message {
    pub fn new(id: impl Into<String>, body: impl Into<String>, receipt_handle: ReceiptHandle) -> Self {
        Message {
            id: id.into(),
            body: body.into(),
            receipt_handle,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Queue-assigned message identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn receipt_handle(&self) -> &ReceiptHandle {
        &self.receipt_handle
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Converts an SQS message, flattening system and string message attributes.
    ///
    /// Returns `None` when SQS did not provide a receipt handle, since such a
    /// delivery can never be acknowledged.
    pub(crate) fn from_sqs(message: aws_sdk_sqs::types::Message) -> Option<Self> {
        let id = message.message_id().unwrap_or("unknown").to_string();
        let Some(receipt_handle) = message.receipt_handle() else {
            warn!(message_id = %id, "Received a message with no receipt handle, ignoring");
            return None;
        };

        let mut attributes = HashMap::new();
        if let Some(system) = message.attributes() {
            for (name, value) in system {
                attributes.insert(name.as_str().to_string(), value.clone());
            }
        }
        if let Some(custom) = message.message_attributes() {
            for (name, value) in custom {
                if let Some(value) = value.string_value() {
                    attributes.insert(name.clone(), value.to_string());
                }
            }
        }

        Some(Message {
            body: message.body().unwrap_or_default().to_string(),
            receipt_handle: ReceiptHandle::new(receipt_handle),
            id,
            attributes,
        })
    }
}
