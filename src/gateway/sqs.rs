use async_trait::async_trait;
use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::operation::delete_message::DeleteMessageError;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use tracing::debug;

use super::{QueueGateway, ReceiveRequest};
use crate::errors::{QueueError, classify_sdk_error};
use crate::message::{Batch, Message, ReceiptHandle};

/// [`QueueGateway`] backed by an AWS SQS queue.
#[derive(Debug, Clone)]
pub struct SqsQueueGateway {
    /// The AWS SQS client used to interact with the SQS service.
    sqs_client: aws_sdk_sqs::Client,

    queue_url: String,
}

impl SqsQueueGateway {
    pub fn new(sqs_client: aws_sdk_sqs::Client, queue_url: &str) -> Self {
        SqsQueueGateway {
            sqs_client,
            queue_url: queue_url.to_string(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl QueueGateway for SqsQueueGateway {
    async fn receive(&self, request: ReceiveRequest) -> Result<Batch, QueueError> {
        let output = self
            .sqs_client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(request.max_messages)
            .wait_time_seconds(request.wait_time_seconds)
            .visibility_timeout(request.visibility_timeout_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| classify_sdk_error("ReceiveMessage", e))?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(Message::from_sqs)
            .collect())
    }

    async fn delete(&self, receipt_handle: &ReceiptHandle) -> Result<(), QueueError> {
        let result = self
            .sqs_client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle.as_str())
            .send()
            .await;

        settle_delete(result, receipt_handle)
    }

    async fn change_visibility(
        &self,
        receipt_handle: &ReceiptHandle,
        visibility_timeout_seconds: i32,
    ) -> Result<(), QueueError> {
        self.sqs_client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle.as_str())
            .visibility_timeout(visibility_timeout_seconds)
            .send()
            .await
            .map_err(|e| classify_sdk_error("ChangeMessageVisibility", e))?;

        Ok(())
    }
}

/// Maps the result of a `DeleteMessage` call.
///
/// A receipt handle that is invalid or has expired means the message is
/// already gone or will be redelivered, so the delete counts as done.
fn settle_delete<O, R>(
    result: Result<O, SdkError<DeleteMessageError, R>>,
    receipt_handle: &ReceiptHandle,
) -> Result<(), QueueError>
where
    R: std::fmt::Debug,
{
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_stale_receipt(&e) => {
            debug!(receipt_handle = %receipt_handle, "Receipt handle no longer valid, treating delete as done");
            Ok(())
        }
        Err(e) => Err(classify_sdk_error("DeleteMessage", e)),
    }
}

fn is_stale_receipt<R>(err: &SdkError<DeleteMessageError, R>) -> bool {
    match err.as_service_error() {
        Some(DeleteMessageError::ReceiptHandleIsInvalid(_)) => true,
        // SQS reports expired receipts as an invalid parameter value.
        Some(e) => e.code() == Some("InvalidParameterValue"),
        None => false,
    }
}
