#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rs_sqs_worker::errors::QueueError;
use rs_sqs_worker::gateway::{QueueGateway, ReceiveRequest};
use rs_sqs_worker::message::{Batch, Message, ReceiptHandle};
use rs_sqs_worker::receiver::ReceiverConfig;
use rs_sqs_worker::shutdown::ShutdownController;
use tracing::subscriber::DefaultGuard;

/// Gateway that replays a fixed sequence of receive results.
///
/// Once the script is used up, receives block like an endless long-poll,
/// optionally triggering a shutdown first.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<Batch, QueueError>>>,
    failing_deletes: Mutex<HashSet<String>>,
    stop_when_exhausted: Option<ShutdownController>,
    pub receives: AtomicUsize,
    pub deletes: Mutex<Vec<ReceiptHandle>>,
    pub released: Mutex<Vec<ReceiptHandle>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<Batch, QueueError>>) -> Self {
        ScriptedGateway {
            script: Mutex::new(script.into()),
            ..ScriptedGateway::default()
        }
    }

    pub fn stop_when_exhausted(mut self, shutdown: &ShutdownController) -> Self {
        self.stop_when_exhausted = Some(shutdown.clone());
        self
    }

    pub fn fail_delete_for(self, receipt_handle: &str) -> Self {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(receipt_handle.to_string());
        self
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.as_str().to_string())
            .collect()
    }

    pub fn released(&self) -> Vec<String> {
        self.released
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl QueueGateway for ScriptedGateway {
    async fn receive(&self, _request: ReceiveRequest) -> Result<Batch, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                if let Some(shutdown) = &self.stop_when_exhausted {
                    shutdown.trigger();
                }
                std::future::pending().await
            }
        }
    }

    async fn delete(&self, receipt_handle: &ReceiptHandle) -> Result<(), QueueError> {
        self.deletes.lock().unwrap().push(receipt_handle.clone());
        if self.failing_deletes.lock().unwrap().contains(receipt_handle.as_str()) {
            return Err(QueueError::transient("DeleteMessage", "connection reset"));
        }
        Ok(())
    }

    async fn change_visibility(
        &self,
        receipt_handle: &ReceiptHandle,
        _visibility_timeout_seconds: i32,
    ) -> Result<(), QueueError> {
        self.released.lock().unwrap().push(receipt_handle.clone());
        Ok(())
    }
}

pub fn message(n: usize, body: &str) -> Message {
    Message::new(format!("msg-{n}"), body, ReceiptHandle::new(format!("rh-{n}")))
}

pub fn batch(bodies: &[&str]) -> Batch {
    bodies
        .iter()
        .enumerate()
        .map(|(i, body)| message(i + 1, body))
        .collect()
}

pub fn fast_config() -> ReceiverConfig {
    ReceiverConfig {
        poll_backoff_base: Duration::from_millis(1),
        poll_backoff_max: Duration::from_millis(5),
        ..ReceiverConfig::default()
    }
}

/// Collects formatted log output of the current thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    pub fn install(&self) -> DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn lines_at(&self, level: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(level))
            .map(str::to_string)
            .collect()
    }
}
