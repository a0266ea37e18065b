use std::time::Duration;

use serde::Deserialize;

use crate::dispatcher::ConcurrencyPolicy;
use crate::errors::SqsWorkerError;
use crate::receiver::ReceiverConfig;

/// Which built-in handler the binary runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    #[default]
    Log,
    SnsEnvelope,
    ObjectStore,
}

/// Worker configuration read from the process environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub sqs_queue_url: String,
    pub aws_endpoint: Option<String>,
    pub aws_region: Option<String>,
    /// Comma separated topics the queue is subscribed to on start.
    pub sns_topic_arns: Option<String>,

    #[serde(default)]
    pub handler: HandlerKind,
    #[serde(default = "default_failure_marker")]
    pub failure_marker: String,
    pub object_bucket: Option<String>,
    pub publish_topic_arn: Option<String>,
    #[serde(default = "default_event_type")]
    pub event_type: String,

    pub max_messages: Option<i32>,
    pub wait_time_seconds: Option<i32>,
    pub visibility_timeout_seconds: Option<i32>,
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    pub handler_deadline_seconds: Option<u64>,
    #[serde(default)]
    pub release_skipped: bool,
}

fn default_failure_marker() -> String {
    "fail".to_string()
}

fn default_event_type() -> String {
    "ObjectProcessed".to_string()
}

impl Config {
    pub fn load() -> Result<Self, SqsWorkerError> {
        Ok(envy::from_env::<Self>()?)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, SqsWorkerError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::from_iter::<_, Self>(vars)?)
    }

    /// Name used in logs, the last path segment of the queue URL.
    pub fn handler_name(&self) -> &str {
        self.sqs_queue_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.sqs_queue_url)
    }

    pub fn topic_arns(&self) -> Vec<String> {
        self.sns_topic_arns
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|arn| !arn.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn object_bucket(&self) -> Result<&str, SqsWorkerError> {
        self.object_bucket.as_deref().ok_or_else(|| {
            SqsWorkerError::ConfigurationError(
                "OBJECT_BUCKET is required for the object-store handler".to_string(),
            )
        })
    }

    pub fn receiver_config(&self) -> Result<ReceiverConfig, SqsWorkerError> {
        let defaults = ReceiverConfig::default();
        let config = ReceiverConfig {
            max_number_of_messages: self.max_messages.unwrap_or(defaults.max_number_of_messages),
            wait_time_seconds: self.wait_time_seconds.unwrap_or(defaults.wait_time_seconds),
            visibility_timeout_seconds: self
                .visibility_timeout_seconds
                .unwrap_or(defaults.visibility_timeout_seconds),
            policy: self.concurrency,
            handler_deadline: self.handler_deadline_seconds.map(Duration::from_secs),
            release_skipped: self.release_skipped,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}
