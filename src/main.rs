//! Event relay.
//!
//! Reads one batch of queue records as JSON from stdin, relays every message
//! to the remote event API and writes the batch response, listing the records
//! the queue must redeliver, to stdout.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_delivery::{BatchProcessor, LogOnlyQueue, QueueRecord};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use crate::config::Config;

/// Queue event envelope delivered to the relay.
#[derive(Debug, Deserialize)]
struct QueueEvent {
    #[serde(rename = "Records", default)]
    records: Vec<QueueRecord>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting event relay");

    let config = Config::load()?;
    info!(
        base_timeout = config.base_timeout,
        timeout_factor = config.timeout_factor,
        max_concurrency = config.max_concurrency,
        batch_environment = %config.batch_environment,
        queue_url = config.queue_url.as_deref().unwrap_or("<unset>"),
        "configuration loaded"
    );

    let queue = Arc::new(LogOnlyQueue::new(config.queue_url.clone()));
    let processor = BatchProcessor::new(config.to_processor_config()?, queue)
        .context("Failed to build batch processor")?;

    let event = read_event().await?;
    let response = processor.process_batch(event.records).await;

    let mut output = serde_json::to_vec(&response).context("Failed to encode batch response")?;
    output.push(b'\n');

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await.context("Failed to write batch response")?;
    stdout.flush().await.context("Failed to flush batch response")?;

    let stats = processor.stats().await;
    info!(
        processed = stats.records_processed,
        succeeded = stats.succeeded,
        failed_items = response.batch_item_failures.len(),
        "event relay finished"
    );
    Ok(())
}

/// Reads the queue event from stdin.
async fn read_event() -> Result<QueueEvent> {
    let mut input = Vec::new();
    tokio::io::stdin().read_to_end(&mut input).await.context("Failed to read stdin")?;

    serde_json::from_slice(&input).context("Failed to decode queue event")
}

/// Initializes tracing from `RUST_LOG`, falling back to `LOG_LEVEL`.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    const DEFAULT_FILTER: &str = "info,event_relay=debug,relay_delivery=debug";

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match std::env::var("LOG_LEVEL") {
            Ok(level) if !level.trim().is_empty() => {
                EnvFilter::try_new(level.trim().to_ascii_lowercase())
            },
            _ => EnvFilter::try_new(DEFAULT_FILTER),
        })
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
