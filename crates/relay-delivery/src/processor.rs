//! Batch processing entry point.
//!
//! Each record of a batch runs through validation and submission on its own
//! task, bounded by a semaphore. Outcomes are sorted into acknowledged
//! records and records the queue must redeliver; retryable failures get a
//! visibility delay from the retry coordinator once the whole batch is done.

use std::{collections::BTreeSet, sync::Arc};

use relay_core::BatchEnvironment;
use tokio::{
    sync::{RwLock, Semaphore},
    task::JoinSet,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    cache::{ClientCache, PoolConfig},
    client::RemoteSubmitter,
    error::{ErrorCategory, FailureKind, Result, SubmissionError},
    queue::{BatchResponse, QueueRecord, VisibilityQueue},
    retry::{FailedRequest, RetryCoordinator, RetryPolicy},
    validator::MessageValidator,
};

/// Metric name emitted for oversized messages.
pub const MESSAGE_TOO_LARGE_METRIC: &str = "MessageTooLarge";

/// Configuration for the batch processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Shared transport pool settings.
    pub pool: PoolConfig,

    /// Redelivery backoff policy.
    pub retry_policy: RetryPolicy,

    /// Records processed concurrently within one batch.
    pub max_concurrency: usize,

    /// Validate records without submitting them.
    pub submission_disabled: bool,

    /// Environment outbound batches are tagged with.
    pub environment: BatchEnvironment,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            retry_policy: RetryPolicy::default(),
            max_concurrency: crate::DEFAULT_MAX_CONCURRENCY,
            submission_disabled: false,
            environment: BatchEnvironment::default(),
        }
    }
}

/// Running counters for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Records processed since startup.
    pub records_processed: u64,
    /// Records submitted successfully, or validated while submission is off.
    pub succeeded: u64,
    /// Records acknowledged after a terminal failure.
    pub terminal_failures: u64,
    /// Records handed to the retry coordinator.
    pub retryable_failures: u64,
    /// Records rejected as too large.
    pub oversized: u64,
    /// `MessageTooLarge` metric increments, first deliveries only.
    pub oversized_reported: u64,
    /// Visibility changes that failed.
    pub visibility_failures: u64,
}

/// What happened to one record.
#[derive(Debug)]
enum RecordOutcome {
    Delivered,
    Acknowledged,
    Oversized { reported: bool },
    Retry(FailedRequest),
}

/// Drives batches of queue records to the remote API.
pub struct BatchProcessor {
    config: ProcessorConfig,
    validator: MessageValidator,
    submitter: RemoteSubmitter,
    coordinator: RetryCoordinator,
    stats: Arc<RwLock<ProcessorStats>>,
}

impl BatchProcessor {
    /// Creates a processor with its own client cache.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::Configuration` if the shared transport
    /// client cannot be built.
    pub fn new(config: ProcessorConfig, queue: Arc<dyn VisibilityQueue>) -> Result<Self> {
        let cache = Arc::new(ClientCache::new(&config.pool)?);
        Ok(Self::with_cache(config, cache, queue))
    }

    /// Creates a processor sharing an existing client cache.
    pub fn with_cache(
        config: ProcessorConfig,
        cache: Arc<ClientCache>,
        queue: Arc<dyn VisibilityQueue>,
    ) -> Self {
        let validator = MessageValidator::new(config.environment);
        let submitter = RemoteSubmitter::new(cache, config.environment);
        let coordinator = RetryCoordinator::new(queue, config.retry_policy.clone());

        Self {
            config,
            validator,
            submitter,
            coordinator,
            stats: Arc::new(RwLock::new(ProcessorStats::default())),
        }
    }

    /// Returns the processor configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Returns a snapshot of the running counters.
    pub async fn stats(&self) -> ProcessorStats {
        self.stats.read().await.clone()
    }

    /// Processes one batch and returns the records to redeliver.
    ///
    /// Failed item identifiers keep the order of the input records. A record
    /// whose task panics is reported as failed so the queue redelivers it.
    pub async fn process_batch(&self, records: Vec<QueueRecord>) -> BatchResponse {
        let record_count = records.len();
        info!(records = record_count, "processing batch");

        let message_ids: Vec<String> = records.iter().map(|r| r.message_id.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, record) in records.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let validator = self.validator;
            let submitter = self.submitter.clone();
            let submission_disabled = self.config.submission_disabled;

            let span = info_span!(
                "process_record",
                message_id = %record.message_id,
                receive_count = record.receive_count()
            );

            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcome =
                        process_record(validator, &submitter, submission_disabled, &record).await;
                    (index, outcome)
                }
                .instrument(span),
            );
        }

        let mut unreported: BTreeSet<usize> = (0..record_count).collect();
        let mut redeliver = BTreeSet::new();
        let mut failed_requests = Vec::new();
        let mut stats =
            ProcessorStats { records_processed: record_count as u64, ..Default::default() };

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "record task failed");
                    continue;
                },
            };
            unreported.remove(&index);

            match outcome {
                RecordOutcome::Delivered => stats.succeeded += 1,
                RecordOutcome::Acknowledged => stats.terminal_failures += 1,
                RecordOutcome::Oversized { reported } => {
                    stats.oversized += 1;
                    stats.oversized_reported += u64::from(reported);
                    redeliver.insert(index);
                },
                RecordOutcome::Retry(request) => {
                    stats.retryable_failures += 1;
                    redeliver.insert(index);
                    failed_requests.push(request);
                },
            }
        }

        // Anything still unreported panicked; let the queue try again.
        redeliver.extend(unreported);

        let report = self.coordinator.apply(failed_requests).await;
        stats.visibility_failures = report.failed as u64;

        let response =
            BatchResponse::from_failures(redeliver.into_iter().map(|i| message_ids[i].clone()));

        info!(
            records = record_count,
            succeeded = stats.succeeded,
            terminal = stats.terminal_failures,
            retryable = stats.retryable_failures,
            oversized = stats.oversized,
            failed_items = response.batch_item_failures.len(),
            "batch processed"
        );

        self.record_stats(&stats).await;
        response
    }

    async fn record_stats(&self, batch: &ProcessorStats) {
        let mut stats = self.stats.write().await;
        stats.records_processed += batch.records_processed;
        stats.succeeded += batch.succeeded;
        stats.terminal_failures += batch.terminal_failures;
        stats.retryable_failures += batch.retryable_failures;
        stats.oversized += batch.oversized;
        stats.oversized_reported += batch.oversized_reported;
        stats.visibility_failures += batch.visibility_failures;
    }
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

async fn process_record(
    validator: MessageValidator,
    submitter: &RemoteSubmitter,
    submission_disabled: bool,
    record: &QueueRecord,
) -> RecordOutcome {
    let result = match validator.validate(record.body.as_bytes()) {
        Ok(_) if submission_disabled => {
            info!("submission disabled, acknowledging validated message");
            Ok(())
        },
        Ok(message) => submitter.submit(&message).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            debug!("record delivered");
            RecordOutcome::Delivered
        },
        Err(e) => classify_failure(e, record),
    }
}

fn classify_failure(error: SubmissionError, record: &QueueRecord) -> RecordOutcome {
    let category = ErrorCategory::from(&error);
    let receive_count = record.receive_count();

    if let SubmissionError::PayloadTooLarge { size_bytes, original } = &error {
        // Redeliveries of the same oversized record stay quiet.
        let reported = receive_count <= 1;
        if reported {
            error!(
                size_bytes,
                subject = original.subject(),
                event_count = original.events.len(),
                "message too large to submit"
            );
            info!(metric = MESSAGE_TOO_LARGE_METRIC, value = 1, "metric");
        }
        return RecordOutcome::Oversized { reported };
    }

    match error.kind() {
        FailureKind::Terminal => {
            error!(
                category = %category,
                error = %error,
                "dropping message that cannot be delivered"
            );
            RecordOutcome::Acknowledged
        },
        FailureKind::Retryable => {
            warn!(
                category = %category,
                status_code = error.status_code(),
                retry_after_seconds = error.retry_after_seconds(),
                error = %error,
                "message will be retried"
            );
            RecordOutcome::Retry(FailedRequest {
                message_id: record.message_id.clone(),
                status_code: error.status_code(),
                retry_after_seconds: error.retry_after_seconds(),
                receipt_handle: record.receipt_handle.clone(),
                receive_count,
            })
        },
    }
}
