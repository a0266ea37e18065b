mod common;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{CapturedLogs, ScriptedGateway, batch, fast_config, message};
use rs_sqs_worker::dispatcher::ConcurrencyPolicy;
use rs_sqs_worker::errors::{HandlerError, QueueError, SqsWorkerError};
use rs_sqs_worker::handler::{FnHandler, Handler, LogHandler};
use rs_sqs_worker::message::Message;
use rs_sqs_worker::receiver::{QueueReceiver, ReceiverConfig};
use rs_sqs_worker::shutdown::{RunState, ShutdownController};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn marker_handler() -> Arc<dyn Handler> {
    Arc::new(LogHandler::new("test-queue").with_failure_marker("fail"))
}

#[tokio::test]
async fn mixed_batch_deletes_only_successes() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let shutdown = ShutdownController::new();
    let gateway = Arc::new(
        ScriptedGateway::new(vec![Ok(batch(&["ok-1", "contains fail", "ok-2"]))])
            .stop_when_exhausted(&shutdown),
    );
    let config = ReceiverConfig {
        policy: ConcurrencyPolicy::Sequential,
        ..fast_config()
    };
    let receiver = QueueReceiver::with_gateway(gateway.clone(), marker_handler(), config);

    receiver.run(&shutdown).await.unwrap();

    assert_eq!(gateway.deleted(), vec!["rh-1", "rh-3"]);
    let errors = logs.lines_at("ERROR");
    assert_eq!(errors.len(), 1, "unexpected error lines: {errors:?}");
    assert!(errors[0].contains("msg-2"));
    assert_eq!(shutdown.state(), RunState::Stopped);
}

#[tokio::test]
async fn empty_batches_poll_again_quietly() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let shutdown = ShutdownController::new();
    let gateway = Arc::new(
        ScriptedGateway::new(vec![Ok(vec![]), Ok(vec![]), Ok(batch(&["ok-1"]))])
            .stop_when_exhausted(&shutdown),
    );
    let receiver = QueueReceiver::with_gateway(gateway.clone(), marker_handler(), fast_config());

    receiver.run(&shutdown).await.unwrap();

    assert_eq!(gateway.receives.load(Ordering::SeqCst), 4);
    assert_eq!(gateway.deleted(), vec!["rh-1"]);
    assert!(logs.lines_at("ERROR").is_empty());
    assert!(logs.lines_at("WARN").is_empty());
}

#[tokio::test]
async fn transient_receive_errors_are_retried() {
    let shutdown = ShutdownController::new();
    let gateway = Arc::new(
        ScriptedGateway::new(vec![
            Err(QueueError::transient("ReceiveMessage", "throttled")),
            Err(QueueError::transient("ReceiveMessage", "connection reset")),
            Ok(batch(&["ok-1"])),
        ])
        .stop_when_exhausted(&shutdown),
    );
    let receiver = QueueReceiver::with_gateway(gateway.clone(), marker_handler(), fast_config());

    receiver.run(&shutdown).await.unwrap();

    assert_eq!(gateway.deleted(), vec!["rh-1"]);
}

#[tokio::test]
async fn fatal_receive_error_stops_the_worker() {
    let shutdown = ShutdownController::new();
    let gateway = Arc::new(ScriptedGateway::new(vec![Err(QueueError::fatal(
        "ReceiveMessage",
        "AWS.SimpleQueueService.NonExistentQueue",
    ))]));
    let receiver = QueueReceiver::with_gateway(gateway.clone(), marker_handler(), fast_config());

    let result = receiver.run(&shutdown).await;

    assert!(matches!(
        result,
        Err(SqsWorkerError::QueueError(QueueError::Fatal { .. }))
    ));
    assert_eq!(shutdown.state(), RunState::Stopped);
    assert_eq!(gateway.receives.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delete_failures_do_not_stop_the_loop() {
    let shutdown = ShutdownController::new();
    let gateway = Arc::new(
        ScriptedGateway::new(vec![Ok(batch(&["ok-1"])), Ok(vec![message(2, "ok-2")])])
            .fail_delete_for("rh-1")
            .stop_when_exhausted(&shutdown),
    );
    let receiver = QueueReceiver::with_gateway(gateway.clone(), marker_handler(), fast_config());

    receiver.run(&shutdown).await.unwrap();

    assert_eq!(gateway.deleted(), vec!["rh-1", "rh-2"]);
}

#[tokio::test]
async fn redelivered_receipt_can_be_deleted_twice() {
    let shutdown = ShutdownController::new();
    let gateway = Arc::new(
        ScriptedGateway::new(vec![Ok(batch(&["ok-1"])), Ok(batch(&["ok-1"]))])
            .stop_when_exhausted(&shutdown),
    );
    let receiver = QueueReceiver::with_gateway(gateway.clone(), marker_handler(), fast_config());

    receiver.run(&shutdown).await.unwrap();

    assert_eq!(gateway.deleted(), vec!["rh-1", "rh-1"]);
}

#[tokio::test]
async fn handler_panic_does_not_crash_the_loop() {
    let shutdown = ShutdownController::new();
    let gateway = Arc::new(
        ScriptedGateway::new(vec![Ok(batch(&["boom", "ok-2"]))]).stop_when_exhausted(&shutdown),
    );
    let handler: Arc<dyn Handler> = Arc::new(FnHandler::new(
        |message: Message, _shared: (), _cancel| async move {
            if message.body() == "boom" {
                panic!("handler bug");
            }
            Ok(())
        },
        (),
    ));
    let receiver = QueueReceiver::with_gateway(gateway.clone(), handler, fast_config());

    receiver.run(&shutdown).await.unwrap();

    assert_eq!(gateway.deleted(), vec!["rh-2"]);
}

/// Handler written without `async_trait` that panics before building its future.
struct EagerPanicHandler;

impl Handler for EagerPanicHandler {
    fn handle<'life0, 'life1, 'life2, 'async_trait>(
        &'life0 self,
        message: &'life1 Message,
        _cancel: &'life2 CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        if message.body() == "boom" {
            panic!("eager handler bug");
        }
        Box::pin(async { Ok(()) })
    }
}

#[tokio::test]
async fn eager_handler_panic_does_not_crash_sequential_loop() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let shutdown = ShutdownController::new();
    let gateway = Arc::new(
        ScriptedGateway::new(vec![Ok(batch(&["boom", "ok-2"])), Ok(batch(&["ok-1"]))])
            .stop_when_exhausted(&shutdown),
    );
    let config = ReceiverConfig {
        policy: ConcurrencyPolicy::Sequential,
        ..fast_config()
    };
    let receiver = QueueReceiver::with_gateway(gateway.clone(), Arc::new(EagerPanicHandler), config);

    receiver.run(&shutdown).await.unwrap();

    assert_eq!(gateway.deleted(), vec!["rh-2", "rh-1"]);
    assert_eq!(shutdown.state(), RunState::Stopped);
    assert!(logs.lines_at("ERROR").iter().any(|line| line.contains("msg-1")));
}

#[tokio::test]
async fn invalid_config_is_rejected_before_receiving() {
    let shutdown = ShutdownController::new();
    let gateway = Arc::new(ScriptedGateway::new(vec![Ok(batch(&["ok-1"]))]));
    let config = ReceiverConfig {
        max_number_of_messages: 0,
        ..fast_config()
    };
    let receiver = QueueReceiver::with_gateway(gateway.clone(), marker_handler(), config);

    let result = receiver.run(&shutdown).await;

    assert!(matches!(result, Err(SqsWorkerError::ConfigurationError(_))));
    assert_eq!(gateway.receives.load(Ordering::SeqCst), 0);
    assert_eq!(shutdown.state(), RunState::Stopped);
}

#[tokio::test]
async fn shutdown_releases_a_blocked_receive() {
    let shutdown = ShutdownController::new();
    let gateway = Arc::new(ScriptedGateway::new(vec![]));
    let receiver = Arc::new(QueueReceiver::with_gateway(
        gateway.clone(),
        marker_handler(),
        fast_config(),
    ));

    let task = {
        let receiver = receiver.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { receiver.run(&shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(shutdown.state(), RunState::Running);
    assert!(shutdown.trigger());

    let result = timeout(Duration::from_secs(1), task)
        .await
        .expect("receiver did not stop after shutdown");
    assert!(result.unwrap().is_ok());
    assert_eq!(shutdown.state(), RunState::Stopped);
}

/// Handler that reports when it starts and then waits for the test to let it finish.
fn gated_handler(
    started: mpsc::UnboundedSender<String>,
    gate: Arc<Semaphore>,
    invocations: Arc<AtomicUsize>,
) -> Arc<dyn Handler> {
    Arc::new(FnHandler::new(
        move |message: Message, gate: Arc<Semaphore>, _cancel| {
            let started = started.clone();
            let invocations = invocations.clone();
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                let _ = started.send(message.id().to_string());
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| HandlerError::Unexpected(e.to_string()))?;
                Ok::<(), HandlerError>(())
            }
        },
        gate,
    ))
}

async fn drain_mid_batch(release_skipped: bool) -> (Arc<ScriptedGateway>, usize) {
    let shutdown = ShutdownController::new();
    let gateway = Arc::new(
        ScriptedGateway::new(vec![Ok(batch(&["a", "b", "c", "d", "e"]))])
            .stop_when_exhausted(&shutdown),
    );
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let invocations = Arc::new(AtomicUsize::new(0));
    let config = ReceiverConfig {
        policy: ConcurrencyPolicy::bounded(2).unwrap(),
        release_skipped,
        ..fast_config()
    };
    let receiver = Arc::new(QueueReceiver::with_gateway(
        gateway.clone(),
        gated_handler(started_tx, gate.clone(), invocations.clone()),
        config,
    ));

    let task = {
        let receiver = receiver.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { receiver.run(&shutdown).await })
    };

    for _ in 0..2 {
        timeout(Duration::from_secs(1), started_rx.recv())
            .await
            .expect("handler did not start")
            .unwrap();
    }

    assert!(shutdown.trigger());
    assert_eq!(shutdown.state(), RunState::Draining);
    gate.add_permits(5);

    let result = timeout(Duration::from_secs(1), task)
        .await
        .expect("receiver did not drain");
    assert!(result.unwrap().is_ok());
    assert_eq!(shutdown.state(), RunState::Stopped);

    (gateway, invocations.load(Ordering::SeqCst))
}

#[tokio::test]
async fn shutdown_mid_batch_finishes_inflight_and_skips_queued() {
    let (gateway, invocations) = drain_mid_batch(false).await;

    assert_eq!(invocations, 2);
    assert_eq!(gateway.deleted().len(), 2);
    assert!(gateway.released().is_empty());
    assert_eq!(gateway.receives.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn skipped_messages_can_be_released_on_shutdown() {
    let (gateway, invocations) = drain_mid_batch(true).await;

    assert_eq!(invocations, 2);
    let deleted = gateway.deleted();
    let released = gateway.released();
    assert_eq!(deleted.len(), 2);
    assert_eq!(released.len(), 3);
    assert!(released.iter().all(|r| !deleted.contains(r)));
}
