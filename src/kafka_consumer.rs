use crate::config::KafkaConfig;
use crate::pipeline::DecodePipeline;
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// Name of the document field carrying the base64-encoded payload
pub const PAYLOAD_FIELD: &str = "base64Payload";

/// Notification that a message document was created in the store.
///
/// Delivered at least once; the pipeline tolerates duplicate delivery
/// because the object key is derived from the message id and the decoded
/// flag is a merge update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreatedEvent {
    /// Store-assigned identifier of the new document
    pub message_id: String,
    /// Collection the document was created in
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Snapshot of the document's fields at creation time
    pub fields: serde_json::Value,
}

fn default_collection() -> String {
    "messages".to_string()
}

impl MessageCreatedEvent {
    /// The base64 payload field from the document snapshot, if present
    pub fn base64_payload(&self) -> Option<&str> {
        self.fields.get(PAYLOAD_FIELD).and_then(|v| v.as_str())
    }
}

/// Kafka consumer for message-created events
pub struct DecoderKafkaConsumer {
    consumer: StreamConsumer,
    pipeline: Arc<DecodePipeline>,
    upload_semaphore: Arc<Semaphore>,
}

impl DecoderKafkaConsumer {
    /// Create a new Kafka consumer for message-created events
    pub async fn new(
        config: &KafkaConfig,
        pipeline: Arc<DecodePipeline>,
        upload_concurrency: usize,
    ) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval_ms.to_string(),
            );

        // Configure SSL if enabled
        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        // Configure SASL if credentials provided
        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.message_created_topic])
            .context("Failed to subscribe to message-created topic")?;

        info!(
            topic = %config.message_created_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            pipeline,
            upload_semaphore: Arc::new(Semaphore::new(upload_concurrency)),
        })
    }

    /// Start consuming and processing message-created events.
    ///
    /// Offsets are committed only after the full decode-upload-mark
    /// sequence succeeds; a failed event stays uncommitted so the consumer
    /// group redelivers it. Processing errors never crash the loop.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting decoder Kafka consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => {
                    if let Err(e) = self.process_message(&message).await {
                        error!(
                            error = %e,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Failed to process message-created event"
                        );
                        // Left uncommitted for redelivery; keep consuming
                        metrics::counter!("decoder.messages.failed").increment(1);
                    } else {
                        // Commit offset on success
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                        metrics::counter!("decoder.messages.processed").increment(1);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("decoder.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Process a single message-created event
    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let payload = message.payload().context("Message has no payload")?;

        let event: MessageCreatedEvent = serde_json::from_slice(payload)
            .context("Failed to deserialize message-created event")?;

        debug!(
            message_id = %event.message_id,
            collection = %event.collection,
            "Received message-created event"
        );

        // Bound concurrent uploads across in-flight events
        let _permit = self
            .upload_semaphore
            .acquire()
            .await
            .context("Failed to acquire upload semaphore")?;

        let key = self
            .pipeline
            .handle_created(&event)
            .await
            .with_context(|| format!("Failed to process message {}", event.message_id))?;

        info!(
            message_id = %event.message_id,
            key = %key,
            "Message payload decoded and archived"
        );

        Ok(())
    }
}
