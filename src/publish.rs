use async_trait::async_trait;
use aws_sdk_sns::error::DisplayErrorContext;
use serde::{Deserialize, Serialize};

use crate::errors::BoxError;

/// Downstream event emitted after a message has been processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    #[serde(rename = "Type")]
    pub event_type: String,
    pub body: String,
    pub message_id: String,
}

/// Narrow interface to a pub/sub service.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BoxError>;
}

/// [`Publisher`] backed by Amazon SNS.
#[derive(Debug, Clone)]
pub struct SnsPublisher {
    sns_client: aws_sdk_sns::Client,
}

impl SnsPublisher {
    pub fn new(sns_client: aws_sdk_sns::Client) -> Self {
        SnsPublisher { sns_client }
    }
}

#[async_trait]
impl Publisher for SnsPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BoxError> {
        self.sns_client
            .publish()
            .topic_arn(topic)
            .message(payload)
            .send()
            .await
            .map_err(|e| DisplayErrorContext(&e).to_string())?;

        Ok(())
    }
}
