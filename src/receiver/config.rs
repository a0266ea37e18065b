use std::time::Duration;

use crate::dispatcher::ConcurrencyPolicy;
use crate::errors::SqsWorkerError;
use crate::gateway::ReceiveRequest;

/// Hard cap on the batch size imposed by SQS.
pub const MAX_BATCH_SIZE: i32 = 10;

/// Longest long-poll SQS accepts.
pub const MAX_WAIT_TIME_SECONDS: i32 = 20;

/// Longest visibility timeout SQS accepts (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i32 = 43_200;

/// Configuration for the consumption loop.
///
/// This struct defines the parameters for receiving messages from a queue,
/// how received batches are dispatched and how the loop backs off after
/// transient receive failures.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// The maximum number of messages to receive in a single request.
    pub max_number_of_messages: i32,

    /// The wait time for long polling, in seconds.
    pub wait_time_seconds: i32,

    /// How long a received message stays hidden from other consumers.
    pub visibility_timeout_seconds: i32,

    /// Concurrency applied to each received batch.
    pub policy: ConcurrencyPolicy,

    /// Optional local deadline for a single handler invocation.
    ///
    /// Without it a slow handler can outlive the visibility timeout, in which
    /// case the message is delivered again, possibly to another worker, while
    /// still being processed here.
    pub handler_deadline: Option<Duration>,

    /// First delay after a transient receive failure; doubles per
    /// consecutive failure.
    pub poll_backoff_base: Duration,

    /// Upper bound for the receive backoff.
    pub poll_backoff_max: Duration,

    /// Make skipped messages visible again immediately instead of waiting
    /// for their visibility timeout to expire.
    pub release_skipped: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            max_number_of_messages: MAX_BATCH_SIZE,
            wait_time_seconds: MAX_WAIT_TIME_SECONDS,
            visibility_timeout_seconds: 30,
            policy: ConcurrencyPolicy::default(),
            handler_deadline: None,
            poll_backoff_base: Duration::from_secs(1),
            poll_backoff_max: Duration::from_secs(30),
            release_skipped: false,
        }
    }
}

impl ReceiverConfig {
    /// Checks the values against the limits of the queue service.
    pub fn validate(&self) -> Result<(), SqsWorkerError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.max_number_of_messages) {
            return Err(SqsWorkerError::ConfigurationError(format!(
                "max_number_of_messages must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.max_number_of_messages
            )));
        }
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            return Err(SqsWorkerError::ConfigurationError(format!(
                "wait_time_seconds must be between 0 and {MAX_WAIT_TIME_SECONDS}, got {}",
                self.wait_time_seconds
            )));
        }
        if !(0..=MAX_VISIBILITY_TIMEOUT_SECONDS).contains(&self.visibility_timeout_seconds) {
            return Err(SqsWorkerError::ConfigurationError(format!(
                "visibility_timeout_seconds must be between 0 and {MAX_VISIBILITY_TIMEOUT_SECONDS}, got {}",
                self.visibility_timeout_seconds
            )));
        }
        if self.handler_deadline.is_some_and(|d| d.is_zero()) {
            return Err(SqsWorkerError::ConfigurationError(
                "handler_deadline must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest {
            max_messages: self.max_number_of_messages,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
        }
    }

    /// Delay before the next receive after `consecutive_errors` failures in a row.
    pub fn poll_backoff(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.saturating_sub(1).min(16);
        self.poll_backoff_base
            .saturating_mul(1 << exponent)
            .min(self.poll_backoff_max)
    }
}
