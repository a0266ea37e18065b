use std::fmt::Write;
use std::time::Duration;

use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// Boxed error returned by external collaborators (object store, publisher).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error types for the SQS worker.
///
/// These are the errors that end the process: everything recoverable is
/// handled inside the consumption loop and only logged.
#[derive(Debug, Error)]
pub enum SqsWorkerError {
    /// Error that occurs while setting up AWS clients or subscriptions.
    ///
    /// This typically happens when credentials, region or endpoint are wrong,
    /// or when the queue cannot be subscribed to the configured topics.
    #[error("failed to initialize worker: {0}")]
    InitializationError(String),

    /// The process environment does not describe a valid worker.
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    #[error(transparent)]
    QueueError(#[from] QueueError),
}

impl From<envy::Error> for SqsWorkerError {
    fn from(err: envy::Error) -> Self {
        SqsWorkerError::ConfigurationError(err.to_string())
    }
}

/// Failure of a queue gateway operation.
///
/// Transient failures (network, throttling, service hiccups) are retried by the
/// consumption loop. Fatal failures describe a call that can never succeed
/// without operator intervention, such as a queue that does not exist.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transient failure during {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    #[error("fatal failure during {operation}: {message}")]
    Fatal {
        operation: &'static str,
        message: String,
    },
}

impl QueueError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        QueueError::Transient {
            operation,
            message: message.into(),
        }
    }

    pub fn fatal(operation: &'static str, message: impl Into<String>) -> Self {
        QueueError::Fatal {
            operation,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Transient { .. })
    }
}

/// Service error codes that indicate a malformed call or a permanent
/// credential problem.
const FATAL_ERROR_CODES: &[&str] = &[
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "InvalidAddress",
    "InvalidParameterValue",
    "InvalidSecurity",
    "AccessDenied",
    "AccessDeniedException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "SignatureDoesNotMatch",
];

pub(crate) fn is_fatal_error_code(code: &str) -> bool {
    FATAL_ERROR_CODES.contains(&code)
}

/// Classifies an SDK failure into a retryable or fatal [`QueueError`].
pub(crate) fn classify_sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let mut message = String::new();
    // Writing into a String cannot fail.
    let _ = write_err(&mut message, &err);

    match &err {
        SdkError::ConstructionFailure(_) => QueueError::fatal(operation, message),
        SdkError::ServiceError(ctx) => match ctx.err().code() {
            Some(code) if is_fatal_error_code(code) => QueueError::fatal(operation, message),
            _ => QueueError::transient(operation, message),
        },
        _ => QueueError::transient(operation, message),
    }
}

fn write_err(s: &mut String, err: &dyn std::error::Error) -> std::fmt::Result {
    write!(s, "{err}")?;
    if let Some(source) = err.source() {
        write!(s, ": ")?;
        write_err(s, source)?;
    }

    Ok(())
}

/// Why a handler did not complete a message.
///
/// Every variant leaves the message on the queue; it is redelivered once its
/// visibility timeout expires.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler declined the message, e.g. because it carries the poison
    /// marker or cannot be decoded.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// A call to an external collaborator failed.
    #[error("{operation} failed: {source}")]
    External {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// The handler observed the cancellation signal and stopped early.
    #[error("processing cancelled")]
    Cancelled,

    /// The local processing deadline elapsed before the handler finished.
    #[error("processing exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// The handler panicked.
    #[error("unexpected handler defect: {0}")]
    Unexpected(String),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        HandlerError::Rejected(reason.into())
    }

    pub fn external(operation: &'static str, source: impl Into<BoxError>) -> Self {
        HandlerError::External {
            operation,
            source: source.into(),
        }
    }
}
