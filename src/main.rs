use std::sync::Arc;

use rs_sqs_worker::client::{load_sdk_config, subscribe_queue_to_topics};
use rs_sqs_worker::config::{Config, HandlerKind};
use rs_sqs_worker::errors::SqsWorkerError;
use rs_sqs_worker::gateway::SqsQueueGateway;
use rs_sqs_worker::handler::{Handler, LogHandler, ObjectStoreHandler, SnsEnvelopeHandler};
use rs_sqs_worker::publish::SnsPublisher;
use rs_sqs_worker::receiver::QueueReceiver;
use rs_sqs_worker::shutdown::ShutdownController;
use rs_sqs_worker::store::S3ObjectStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), SqsWorkerError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    let receiver_config = config.receiver_config()?;
    let sdk_config = load_sdk_config(&config).await;
    let sqs_client = aws_sdk_sqs::Client::new(&sdk_config);

    let topic_arns = config.topic_arns();
    if !topic_arns.is_empty() {
        let sns_client = aws_sdk_sns::Client::new(&sdk_config);
        subscribe_queue_to_topics(&sns_client, &sqs_client, &config.sqs_queue_url, &topic_arns).await?;
    }

    let handler = build_handler(&config, &sdk_config)?;

    let shutdown = ShutdownController::new();
    shutdown.spawn_signal_listener();

    info!(handler = %config.handler_name(), kind = ?config.handler, "Started consumer");

    let receiver = QueueReceiver::new(
        SqsQueueGateway::new(sqs_client, &config.sqs_queue_url),
        handler,
        receiver_config,
    );
    receiver.run(&shutdown).await
}

fn build_handler(
    config: &Config,
    sdk_config: &aws_config::SdkConfig,
) -> Result<Arc<dyn Handler>, SqsWorkerError> {
    let name = config.handler_name();
    let handler: Arc<dyn Handler> = match config.handler {
        HandlerKind::Log => Arc::new(LogHandler::new(name).with_failure_marker(&config.failure_marker)),
        HandlerKind::SnsEnvelope => Arc::new(SnsEnvelopeHandler::new(name)),
        HandlerKind::ObjectStore => {
            // Emulators only serve path-style bucket addressing.
            let s3_config = aws_sdk_s3::config::Builder::from(sdk_config)
                .force_path_style(config.aws_endpoint.is_some())
                .build();
            let store = Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::from_conf(s3_config)));
            let mut handler =
                ObjectStoreHandler::new(store, config.object_bucket()?, &config.failure_marker);
            if let Some(topic) = &config.publish_topic_arn {
                let publisher = Arc::new(SnsPublisher::new(aws_sdk_sns::Client::new(sdk_config)));
                handler = handler.with_events(publisher, topic, &config.event_type);
            }
            Arc::new(handler)
        }
    };
    Ok(handler)
}
