use async_trait::async_trait;

use crate::errors::QueueError;
use crate::message::{Batch, ReceiptHandle};

mod sqs;

pub use sqs::SqsQueueGateway;

/// Parameters of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Upper bound on the batch size, at most the service cap of 10.
    pub max_messages: i32,

    /// Long-poll duration in seconds.
    pub wait_time_seconds: i32,

    /// How long received messages stay hidden from other consumers.
    pub visibility_timeout_seconds: i32,
}

/// Narrow interface to the external queue service.
///
/// Implementations must be safe for concurrent use: the consumption loop and
/// the dispatcher share one gateway.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Long-polls for up to `request.max_messages` messages.
    ///
    /// An empty batch means the long-poll elapsed without messages; it is
    /// never reported as an error.
    async fn receive(&self, request: ReceiveRequest) -> Result<Batch, QueueError>;

    /// Deletes a delivery. Deleting an already deleted or expired receipt
    /// must be reported as success.
    async fn delete(&self, receipt_handle: &ReceiptHandle) -> Result<(), QueueError>;

    /// Changes how long the delivery stays invisible, counted from now.
    async fn change_visibility(
        &self,
        receipt_handle: &ReceiptHandle,
        visibility_timeout_seconds: i32,
    ) -> Result<(), QueueError>;
}
