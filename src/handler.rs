use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::HandlerError;
use crate::message::Message;

mod log;
mod object;
mod sns;

pub use log::LogHandler;
pub use object::ObjectStoreHandler;
pub use sns::{SnsEnvelopeHandler, SnsEvent, SnsNotification};

/// Trait for implementing a unit of work applied to one message.
///
/// The message body is opaque to the pipeline; interpreting it is up to the
/// handler. Implementations should check `cancel` before every external call
/// they make and return [`HandlerError::Cancelled`] instead of starting new
/// work once it fires.
///
/// Returning `Ok(())` acknowledges the message, which deletes it from the
/// queue. Any error leaves it there to be redelivered.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &Message, cancel: &CancellationToken) -> Result<(), HandlerError>;
}

/// Implementation of [`Handler`] that wraps a closure and a shared resource.
///
/// The closure receives an owned copy of the message, a clone of the shared
/// resource and the cancellation token.
///
/// # Type Parameters
///
/// * `F` - The message handler function type
/// * `Fut` - The future returned by the handler function
/// * `TShared` - The type of shared resources passed to the handler
pub struct FnHandler<F, Fut, TShared>
where
    F: Fn(Message, TShared, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
    TShared: Send + Sync + Clone,
{
    handler_fn: F,
    shared_resources: TShared,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut, TShared> FnHandler<F, Fut, TShared>
where
    F: Fn(Message, TShared, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
    TShared: Send + Sync + Clone,
{
    /// Creates a handler from a function and the resources shared between calls.
    pub fn new(handler_fn: F, shared_resources: TShared) -> Self {
        FnHandler {
            handler_fn,
            shared_resources,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, TShared> Handler for FnHandler<F, Fut, TShared>
where
    F: Fn(Message, TShared, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
    TShared: Send + Sync + Clone,
{
    async fn handle(&self, message: &Message, cancel: &CancellationToken) -> Result<(), HandlerError> {
        (self.handler_fn)(message.clone(), self.shared_resources.clone(), cancel.clone()).await
    }
}
