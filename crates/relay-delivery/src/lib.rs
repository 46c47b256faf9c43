//! Queue-to-API relay pipeline with at-least-once delivery.
//!
//! This crate takes batches of queue records, submits each message to the
//! remote event API and tells the queue which records to redeliver and when.
//!
//! # Architecture
//!
//! Every record goes through the same pipeline:
//!
//! 1. **Validate** - Decode the body, check credentials and batch size
//! 2. **Resolve Client** - Fetch the cached handle for the credential triple
//! 3. **Submit** - Post the batch and classify the response
//! 4. **Schedule Redelivery** - Hide retryable records for a backoff delay
//!
//! # Key Features
//!
//! - **Single-flight Client Cache** - One handle per credential triple,
//!   built under a shared construction lock
//! - **Failures as Values** - `SubmissionError` carries terminal or
//!   retryable classification plus status and retry hint
//! - **Queue-driven Retries** - No in-process sleeps; delays become
//!   visibility timeouts
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relay_delivery::{BatchProcessor, LogOnlyQueue, ProcessorConfig, SubmissionError};
//!
//! # async fn example() -> std::result::Result<(), SubmissionError> {
//! let queue = Arc::new(LogOnlyQueue::new(None));
//! let processor = BatchProcessor::new(ProcessorConfig::default(), queue)?;
//!
//! let response = processor.process_batch(Vec::new()).await;
//! assert!(response.batch_item_failures.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod validator;

pub use cache::{ClientCache, PoolConfig, RemoteClientHandle};
pub use client::{RemoteSubmitter, DEFAULT_BASE_URL};
pub use error::{ErrorCategory, FailureKind, QueueError, Result, SubmissionError};
pub use processor::{BatchProcessor, ProcessorConfig, ProcessorStats};
pub use queue::{BatchItemFailure, BatchResponse, LogOnlyQueue, QueueRecord, VisibilityQueue};
pub use retry::{FailedRequest, RetryCoordinator, RetryPolicy};
pub use validator::{MessageValidator, MAX_BATCH_SIZE_BYTES};

/// Default number of records processed concurrently per batch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default submission request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
