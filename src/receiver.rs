use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, MessageOutcome, Outcome};
use crate::errors::{QueueError, SqsWorkerError};
use crate::gateway::QueueGateway;
use crate::handler::Handler;
use crate::shutdown::ShutdownController;

pub mod config;

pub use config::ReceiverConfig;

/// Counts of what happened to the messages of one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub acknowledged: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The consumption loop: receives batches, dispatches them to a handler and
/// deletes the messages that were processed successfully.
///
/// Delivery is at-least-once. A message is only deleted after its handler
/// succeeded; failed and skipped messages reappear once their visibility
/// timeout expires and are retried by this or another worker.
pub struct QueueReceiver<G>
where
    G: QueueGateway,
{
    gateway: Arc<G>,
    dispatcher: Dispatcher,
    config: ReceiverConfig,
}

impl<G> QueueReceiver<G>
where
    G: QueueGateway,
{
    pub fn new(gateway: G, handler: Arc<dyn Handler>, config: ReceiverConfig) -> Self {
        Self::with_gateway(Arc::new(gateway), handler, config)
    }

    /// Like [`QueueReceiver::new`] for a gateway that is shared elsewhere.
    pub fn with_gateway(gateway: Arc<G>, handler: Arc<dyn Handler>, config: ReceiverConfig) -> Self {
        let dispatcher = Dispatcher::new(handler, config.policy).with_deadline(config.handler_deadline);
        QueueReceiver {
            gateway,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Runs until `shutdown` is triggered or a fatal queue error occurs.
    ///
    /// On shutdown the blocked receive is abandoned immediately, the batch
    /// being dispatched is allowed to settle and its successful messages are
    /// still deleted. The controller is marked stopped before returning in
    /// either case.
    ///
    /// The configuration is validated before the first receive; an invalid
    /// one is returned as [`SqsWorkerError::ConfigurationError`].
    pub async fn run(&self, shutdown: &ShutdownController) -> Result<(), SqsWorkerError> {
        let result = match self.config.validate() {
            Ok(()) => self.run_until_cancelled(shutdown).await.map_err(SqsWorkerError::from),
            Err(e) => Err(e),
        };
        shutdown.mark_stopped();
        match &result {
            Ok(()) => info!("Receiver stopped"),
            Err(e) => error!(error = %e, "Receiver stopped on fatal error"),
        }
        result
    }

    async fn run_until_cancelled(&self, shutdown: &ShutdownController) -> Result<(), QueueError> {
        let cancel = shutdown.token();
        let request = self.config.receive_request();
        let mut consecutive_errors: u32 = 0;

        info!(
            max_messages = request.max_messages,
            wait_time_seconds = request.wait_time_seconds,
            visibility_timeout_seconds = request.visibility_timeout_seconds,
            policy = %self.dispatcher.policy(),
            "Receiver started"
        );

        loop {
            if cancel.is_cancelled() {
                info!("Shutdown requested, no further receives");
                return Ok(());
            }

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Shutdown requested during receive");
                    return Ok(());
                }
                result = self.gateway.receive(request) => result,
            };

            let batch = match received {
                Ok(batch) => {
                    if consecutive_errors > 0 {
                        info!(previous_errors = consecutive_errors, "Receiving recovered");
                    }
                    consecutive_errors = 0;
                    batch
                }
                Err(e) if e.is_retryable() => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let backoff = self.config.poll_backoff(consecutive_errors);
                    warn!(
                        error = %e,
                        consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to receive messages, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => {}
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            if batch.is_empty() {
                debug!("No messages received");
                continue;
            }

            debug!(message_count = batch.len(), "Received messages");
            let outcomes = self.dispatcher.dispatch(batch, &cancel).await;
            let summary = self.settle(outcomes).await;
            debug!(
                acknowledged = summary.acknowledged,
                failed = summary.failed,
                skipped = summary.skipped,
                "Batch settled"
            );
        }
    }

    /// Acts on the outcomes of one batch.
    ///
    /// Acknowledged messages are deleted; a delete failure is logged and the
    /// message will simply be processed again. Failed messages are logged
    /// and left alone. Skipped messages are left alone, or released right
    /// away when configured.
    pub async fn settle(&self, outcomes: Vec<MessageOutcome>) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for MessageOutcome { message, outcome } in outcomes {
            match outcome {
                Outcome::Acknowledged => {
                    summary.acknowledged += 1;
                    match self.gateway.delete(message.receipt_handle()).await {
                        Ok(()) => info!(message_id = %message.id(), "Processed message"),
                        Err(e) => warn!(
                            message_id = %message.id(),
                            error = %e,
                            "Failed to delete processed message, it will be redelivered"
                        ),
                    }
                }
                Outcome::Failed(reason) => {
                    summary.failed += 1;
                    error!(
                        message_id = %message.id(),
                        receive_count = message.attribute("ApproximateReceiveCount").unwrap_or("unknown"),
                        error = %reason,
                        "Failed to process message, leaving it for redelivery"
                    );
                }
                Outcome::Skipped => {
                    summary.skipped += 1;
                    debug!(message_id = %message.id(), "Skipped message due to shutdown");
                    if self.config.release_skipped {
                        if let Err(e) = self.gateway.change_visibility(message.receipt_handle(), 0).await {
                            warn!(message_id = %message.id(), error = %e, "Failed to release skipped message");
                        }
                    }
                }
            }
        }

        summary
    }
}
