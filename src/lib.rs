//! # AWS SQS Worker
//!
//! A queue-backed message processing worker. It long-polls an SQS queue,
//! hands each batch to a pluggable [`handler::Handler`] and deletes only the
//! messages that were processed successfully. Everything else reappears after
//! its visibility timeout and is retried, by this or another worker.
//!
//! ## Features
//!
//! - Asynchronous processing with tokio
//! - Trait-based handlers, plus a closure adapter with shared resources
//! - Sequential, bounded-parallel and unbounded-parallel dispatch
//! - Transient queue failures are retried with backoff, fatal ones stop the worker
//! - Graceful shutdown on SIGINT/SIGTERM: the current batch settles first
//!
//! Delivery is at-least-once. Handlers should tolerate seeing the same
//! message twice, for example when processing outlives the visibility
//! timeout and the message is handed to another consumer meanwhile.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rs_sqs_worker::gateway::SqsQueueGateway;
//! use rs_sqs_worker::handler::FnHandler;
//! use rs_sqs_worker::receiver::{QueueReceiver, ReceiverConfig};
//! use rs_sqs_worker::shutdown::ShutdownController;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sdk_config = aws_config::load_from_env().await;
//!     let client = aws_sdk_sqs::Client::new(&sdk_config);
//!     let queue_url = "https://sqs.region.amazonaws.com/account/queue-name";
//!
//!     let handler = FnHandler::new(
//!         |message, shared: String, _cancel| async move {
//!             println!("Processing message: {} with shared: {}", message.body(), shared);
//!             Ok(())
//!         },
//!         "shared state".to_string(),
//!     );
//!
//!     let shutdown = ShutdownController::new();
//!     shutdown.spawn_signal_listener();
//!
//!     let receiver = QueueReceiver::new(
//!         SqsQueueGateway::new(client, queue_url),
//!         Arc::new(handler),
//!         ReceiverConfig::default(),
//!     );
//!     receiver.run(&shutdown).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod gateway;
pub mod handler;
pub mod message;
pub mod publish;
pub mod receiver;
pub mod shutdown;
pub mod store;
