//! Redelivery delays for retryable failures.
//!
//! The relay never sleeps or retries in-process. A retryable failure is
//! handed back to the queue with a visibility timeout: the remote API's own
//! hint when it gave one, otherwise a randomized exponential backoff keyed
//! on how many times the record has already been delivered.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::queue::VisibilityQueue;

/// Default base timeout for the first redelivery, in seconds.
pub const DEFAULT_BASE_TIMEOUT_SECONDS: u64 = 180;

/// Default backoff multiplier, also the smallest accepted one.
pub const MIN_BACKOFF_FACTOR: u32 = 2;

/// Longest visibility timeout the queue accepts, in seconds.
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;

/// Retryable failure awaiting a redelivery delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRequest {
    /// Queue message identifier.
    pub message_id: String,
    /// HTTP status of the failed submission, 0 when none was received.
    pub status_code: u16,
    /// Remote retry hint in seconds, 0 when absent.
    pub retry_after_seconds: u64,
    /// Receipt handle used to change visibility.
    pub receipt_handle: String,
    /// Deliveries so far, including the current one.
    pub receive_count: u32,
}

/// Backoff configuration for redelivery delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay range floor for the first delivery.
    pub base_timeout: Duration,

    /// Multiplier applied per prior delivery.
    pub backoff_factor: u32,

    /// Upper bound on any delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(DEFAULT_BASE_TIMEOUT_SECONDS),
            backoff_factor: MIN_BACKOFF_FACTOR,
            max_delay: Duration::from_secs(MAX_VISIBILITY_TIMEOUT_SECONDS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy, raising factors below the minimum.
    pub fn new(base_timeout: Duration, backoff_factor: u32) -> Self {
        Self {
            base_timeout,
            backoff_factor: backoff_factor.max(MIN_BACKOFF_FACTOR),
            ..Self::default()
        }
    }

    /// Returns the `[low, high)` backoff range in seconds for a receive count.
    ///
    /// Both ends are capped at `max_delay`.
    pub fn backoff_range(&self, receive_count: u32) -> (u64, u64) {
        let n = receive_count.max(1);
        let base = self.base_timeout.as_secs();
        let factor = u64::from(self.backoff_factor);
        let cap = self.max_delay.as_secs();

        let low = base.saturating_mul(factor.saturating_pow(n - 1)).min(cap);
        let high = base.saturating_mul(factor.saturating_pow(n)).min(cap);
        (low, high)
    }

    /// Computes the visibility timeout for a failed request.
    pub fn visibility_timeout(&self, request: &FailedRequest) -> Duration {
        let cap = self.max_delay.as_secs();

        if request.retry_after_seconds > 0 {
            return Duration::from_secs(request.retry_after_seconds.min(cap));
        }

        let (low, high) = self.backoff_range(request.receive_count);
        if low >= high {
            return Duration::from_secs(low);
        }

        Duration::from_secs(rand::rng().random_range(low..high))
    }
}

/// Outcome of applying delays for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryReport {
    /// Visibility changes the queue accepted.
    pub applied: usize,
    /// Visibility changes that failed and were only logged.
    pub failed: usize,
}

/// Applies redelivery delays through the queue.
#[derive(Clone)]
pub struct RetryCoordinator {
    queue: Arc<dyn VisibilityQueue>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    /// Creates a coordinator for a queue and policy.
    pub fn new(queue: Arc<dyn VisibilityQueue>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    /// Returns the active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Changes visibility for every failed request concurrently.
    ///
    /// Waits for all changes to finish. Failures are logged and counted,
    /// never propagated: the queue's default visibility applies instead.
    pub async fn apply(&self, requests: Vec<FailedRequest>) -> RetryReport {
        let mut tasks = JoinSet::new();

        for request in requests {
            let timeout = self.policy.visibility_timeout(&request);
            let queue = Arc::clone(&self.queue);

            debug!(
                message_id = %request.message_id,
                status_code = request.status_code,
                retry_after_seconds = request.retry_after_seconds,
                receive_count = request.receive_count,
                visibility_timeout_seconds = timeout.as_secs(),
                "scheduling redelivery"
            );

            tasks.spawn(async move {
                let result = queue.change_visibility(request.receipt_handle, timeout).await;
                (request.message_id, result)
            });
        }

        let mut report = RetryReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.applied += 1,
                Ok((message_id, Err(e))) => {
                    warn!(message_id = %message_id, error = %e, "failed to change visibility");
                    report.failed += 1;
                },
                Err(e) => {
                    warn!(error = %e, "visibility change task aborted");
                    report.failed += 1;
                },
            }
        }

        report
    }
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator").field("policy", &self.policy).finish_non_exhaustive()
    }
}
