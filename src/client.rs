use aws_config::{Region, SdkConfig};
use aws_sdk_sqs::types::QueueAttributeName;
use tracing::info;

use crate::config::Config;
use crate::errors::SqsWorkerError;

/// Loads the shared AWS configuration from the environment.
///
/// Credentials come from the usual sources (`AWS_ACCESS_KEY_ID`,
/// `AWS_SECRET_ACCESS_KEY`, `AWS_PROFILE`, ...). The endpoint and region from
/// `config` take precedence when set, which is how the worker is pointed at
/// a local emulator such as LocalStack.
pub async fn load_sdk_config(config: &Config) -> SdkConfig {
    let mut loader = aws_config::from_env();
    if let Some(endpoint) = &config.aws_endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(region) = &config.aws_region {
        loader = loader.region(Region::new(region.clone()));
    }
    loader.load().await
}

/// Subscribes the queue to every topic in `topic_arns`.
///
/// The queue policy is replaced with one that lets the topics deliver to the
/// queue, then one `sqs` subscription per topic is created. Subscribing is
/// idempotent on the SNS side, so this is safe to run on every start.
pub async fn subscribe_queue_to_topics(
    sns_client: &aws_sdk_sns::Client,
    sqs_client: &aws_sdk_sqs::Client,
    queue_url: &str,
    topic_arns: &[String],
) -> Result<(), SqsWorkerError> {
    let attributes = sqs_client
        .get_queue_attributes()
        .queue_url(queue_url)
        .attribute_names(QueueAttributeName::QueueArn)
        .send()
        .await
        .map_err(|e| init_error("GetQueueAttributes", e))?;

    let queue_arn = attributes
        .attributes()
        .and_then(|attrs| attrs.get(&QueueAttributeName::QueueArn))
        .cloned()
        .ok_or_else(|| {
            SqsWorkerError::InitializationError(format!("queue {queue_url} has no ARN attribute"))
        })?;

    sqs_client
        .set_queue_attributes()
        .queue_url(queue_url)
        .attributes(QueueAttributeName::Policy, queue_policy(&queue_arn, topic_arns))
        .send()
        .await
        .map_err(|e| init_error("SetQueueAttributes", e))?;

    for topic_arn in topic_arns {
        sns_client
            .subscribe()
            .topic_arn(topic_arn)
            .protocol("sqs")
            .endpoint(&queue_arn)
            .send()
            .await
            .map_err(|e| init_error("Subscribe", e))?;
        info!(topic_arn = %topic_arn, queue_arn = %queue_arn, "Subscribed queue to topic");
    }

    Ok(())
}

fn queue_policy(queue_arn: &str, topic_arns: &[String]) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "sns.amazonaws.com" },
            "Action": "sqs:SendMessage",
            "Resource": queue_arn,
            "Condition": { "ArnLike": { "aws:SourceArn": topic_arns } },
        }],
    })
    .to_string()
}

fn init_error<E: std::error::Error>(operation: &str, err: E) -> SqsWorkerError {
    SqsWorkerError::InitializationError(format!(
        "{operation} failed: {}",
        aws_sdk_sqs::error::DisplayErrorContext(&err)
    ))
}
