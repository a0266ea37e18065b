//! Fans a batch out to a [`Handler`] under a concurrency policy.
//!
//! Each message is attempted exactly once per delivery. Retrying is left to
//! the queue: anything that is not acknowledged reappears after its
//! visibility timeout.

use std::fmt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Deserializer};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::errors::HandlerError;
use crate::handler::Handler;
use crate::message::{Batch, Message};

/// How many handler invocations of one batch may run at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// One message at a time, in batch order.
    Sequential,

    /// At most `n` invocations in flight; the rest wait for a free slot.
    BoundedParallel(NonZeroUsize),

    /// Every message of the batch starts at once. Only sensible because
    /// batches are capped by the queue service.
    UnboundedParallel,
}

impl ConcurrencyPolicy {
    pub const DEFAULT_PARALLELISM: usize = 4;

    /// Returns `None` when `n` is zero.
    pub fn bounded(n: usize) -> Option<Self> {
        NonZeroUsize::new(n).map(ConcurrencyPolicy::BoundedParallel)
    }
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        ConcurrencyPolicy::BoundedParallel(
            NonZeroUsize::new(Self::DEFAULT_PARALLELISM).unwrap_or(NonZeroUsize::MIN),
        )
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyPolicy::Sequential => write!(f, "sequential"),
            ConcurrencyPolicy::BoundedParallel(n) => write!(f, "{n}"),
            ConcurrencyPolicy::UnboundedParallel => write!(f, "unbounded"),
        }
    }
}

impl FromStr for ConcurrencyPolicy {
    type Err = String;

    /// Accepts `sequential`, `unbounded` or a positive parallelism limit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ConcurrencyPolicy::Sequential),
            "unbounded" => Ok(ConcurrencyPolicy::UnboundedParallel),
            other => other
                .parse::<usize>()
                .ok()
                .and_then(ConcurrencyPolicy::bounded)
                .ok_or_else(|| {
                    format!("expected `sequential`, `unbounded` or a positive integer, got `{s}`")
                }),
        }
    }
}

impl<'de> Deserialize<'de> for ConcurrencyPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Result of one processing attempt.
#[derive(Debug)]
pub enum Outcome {
    /// The handler succeeded; the message should be deleted.
    Acknowledged,

    /// The handler failed; the message stays on the queue.
    Failed(HandlerError),

    /// The handler never ran, or stopped early, because of cancellation.
    Skipped,
}

impl Outcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Outcome::Acknowledged)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped)
    }
}

/// A message together with what happened to it.
#[derive(Debug)]
pub struct MessageOutcome {
    pub message: Message,
    pub outcome: Outcome,
}

/// Applies a [`ConcurrencyPolicy`] to batches of messages.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn Handler>,
    policy: ConcurrencyPolicy,
    deadline: Option<Duration>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn Handler>, policy: ConcurrencyPolicy) -> Self {
        Dispatcher {
            handler,
            policy,
            deadline: None,
        }
    }

    /// Bounds every invocation by a local deadline, normally the visibility
    /// timeout. Invocations that overrun it are reported as failed.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Processes `batch`, producing exactly one outcome per message.
    ///
    /// Once `cancel` fires no further invocation is started; invocations
    /// already running are awaited. Messages that never started are
    /// reported as [`Outcome::Skipped`]. Outcomes are not in batch order.
    pub async fn dispatch(&self, batch: Batch, cancel: &CancellationToken) -> Vec<MessageOutcome> {
        match self.policy {
            ConcurrencyPolicy::Sequential => self.dispatch_sequential(batch, cancel).await,
            ConcurrencyPolicy::BoundedParallel(n) => {
                let slots = Arc::new(Semaphore::new(n.get()));
                self.dispatch_parallel(batch, Some(slots), cancel).await
            }
            ConcurrencyPolicy::UnboundedParallel => self.dispatch_parallel(batch, None, cancel).await,
        }
    }

    async fn dispatch_sequential(&self, batch: Batch, cancel: &CancellationToken) -> Vec<MessageOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for message in batch {
            let outcome = if cancel.is_cancelled() {
                Outcome::Skipped
            } else {
                invoke(self.handler.as_ref(), &message, cancel, self.deadline).await
            };
            outcomes.push(MessageOutcome { message, outcome });
        }
        outcomes
    }

    async fn dispatch_parallel(
        &self,
        batch: Batch,
        slots: Option<Arc<Semaphore>>,
        cancel: &CancellationToken,
    ) -> Vec<MessageOutcome> {
        let mut pending: Vec<Option<Message>> = Vec::with_capacity(batch.len());
        let mut inflight: JoinSet<(usize, Outcome)> = JoinSet::new();

        for (index, message) in batch.into_iter().enumerate() {
            let handler = self.handler.clone();
            let slots = slots.clone();
            let cancel = cancel.clone();
            let deadline = self.deadline;
            let task_message = message.clone();
            pending.push(Some(message));

            inflight.spawn(async move {
                let _permit = match slots {
                    Some(slots) => {
                        let permit = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return (index, Outcome::Skipped),
                            permit = slots.acquire_owned() => permit,
                        };
                        match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => return (index, Outcome::Skipped),
                        }
                    }
                    None => None,
                };

                if cancel.is_cancelled() {
                    return (index, Outcome::Skipped);
                }
                (index, invoke(handler.as_ref(), &task_message, &cancel, deadline).await)
            });
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(joined) = inflight.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(message) = pending.get_mut(index).and_then(Option::take) {
                        outcomes.push(MessageOutcome { message, outcome });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Dispatch task did not complete");
                }
            }
        }

        // A task that died outside the handler still owes an outcome.
        for message in pending.into_iter().flatten() {
            outcomes.push(MessageOutcome {
                message,
                outcome: Outcome::Failed(HandlerError::Unexpected("dispatch task aborted".to_string())),
            });
        }

        outcomes
    }
}

/// Runs the handler once, converting panics and deadline overruns into
/// failed outcomes.
async fn invoke(
    handler: &dyn Handler,
    message: &Message,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Outcome {
    // `handle` is called inside the guarded future so a panic raised before
    // the handler's future exists is caught as well.
    let attempt = AssertUnwindSafe(async { handler.handle(message, cancel).await }).catch_unwind();

    let result = match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, attempt).await {
            Ok(result) => result,
            Err(_) => return Outcome::Failed(HandlerError::DeadlineExceeded(deadline)),
        },
        None => attempt.await,
    };

    match result {
        Ok(Ok(())) => Outcome::Acknowledged,
        Ok(Err(HandlerError::Cancelled)) => Outcome::Skipped,
        Ok(Err(e)) => Outcome::Failed(e),
        Err(panic_info) => {
            let msg = panic_info
                .downcast_ref::<String>()
                .map(|s| s.as_str())
                .or_else(|| panic_info.downcast_ref::<&str>().copied())
                .unwrap_or("unknown panic");
            error!(message_id = %message.id(), panic = %msg, "Message handler panicked");
            Outcome::Failed(HandlerError::Unexpected(msg.to_string()))
        }
    }
}
