mod config;
mod decoder;
mod document_store;
mod kafka_consumer;
mod pipeline;
mod uploader;

use anyhow::{Context, Result};
use config::Config;
use document_store::DocumentStore;
use kafka_consumer::DecoderKafkaConsumer;
use pipeline::DecodePipeline;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uploader::S3Uploader;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting decoder service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let document_store = Arc::new(
        DocumentStore::new(&config.database)
            .await
            .context("Failed to initialize document store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        document_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let s3_uploader = Arc::new(
        S3Uploader::new(&config.s3)
            .await
            .context("Failed to initialize S3 uploader")?,
    );

    let decode_pipeline = Arc::new(DecodePipeline::new(
        s3_uploader,
        document_store,
        config.s3.key_prefix.clone(),
    ));

    // Create Kafka consumer
    let kafka_consumer = DecoderKafkaConsumer::new(
        &config.kafka,
        decode_pipeline,
        config.s3.upload_concurrency,
    )
    .await
    .context("Failed to initialize Kafka consumer")?;

    // Spawn Kafka consumer task
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = kafka_consumer.run().await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    info!("Decoder service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down decoder service");

    consumer_handle.abort();

    info!("Decoder service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
