//! Queue abstraction for visibility control.
//!
//! The relay never talks to a concrete queue service. It receives records,
//! answers with the identifiers the queue must redeliver, and asks the queue
//! to hide retryable records for a computed delay through
//! [`VisibilityQueue`].

use std::{future::Future, pin::Pin, time::Duration};

pub use relay_core::record::{
    BatchItemFailure, BatchResponse, QueueRecord, RECEIVE_COUNT_ATTRIBUTE,
};
use tracing::info;

use crate::error::QueueError;

/// Queue control operations needed by the retry coordinator.
pub trait VisibilityQueue: Send + Sync + 'static {
    /// Hides a received record for `timeout` before it is redelivered.
    fn change_visibility(
        &self,
        receipt_handle: String,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;
}

/// Queue that only logs visibility changes.
///
/// Backs dry runs and local invocations where no queue service is reachable.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyQueue {
    queue_url: Option<String>,
}

impl LogOnlyQueue {
    /// Creates a queue labelled with its URL in log output.
    pub fn new(queue_url: Option<String>) -> Self {
        Self { queue_url }
    }
}

impl VisibilityQueue for LogOnlyQueue {
    fn change_visibility(
        &self,
        receipt_handle: String,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async move {
            info!(
                queue_url = self.queue_url.as_deref().unwrap_or("<unset>"),
                receipt_handle = %receipt_handle,
                visibility_timeout_seconds = timeout.as_secs(),
                "changing message visibility"
            );
            Ok(())
        })
    }
}

pub mod mock {
    //! In-memory queue recording visibility changes for tests.

    use std::{collections::HashSet, future::Future, pin::Pin, sync::Arc, time::Duration};

    use tokio::sync::RwLock;

    use super::{QueueError, VisibilityQueue};

    /// Recorded visibility change.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct VisibilityChange {
        /// Receipt handle the change targeted.
        pub receipt_handle: String,
        /// Requested visibility timeout.
        pub timeout: Duration,
    }

    /// Queue double that records calls and can fail selected handles.
    #[derive(Debug, Clone, Default)]
    pub struct MockQueue {
        changes: Arc<RwLock<Vec<VisibilityChange>>>,
        failing_handles: Arc<RwLock<HashSet<String>>>,
    }

    impl MockQueue {
        /// Creates an empty mock queue.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes visibility changes for `receipt_handle` fail.
        pub async fn fail_for(&self, receipt_handle: impl Into<String>) {
            self.failing_handles.write().await.insert(receipt_handle.into());
        }

        /// Returns every visibility change attempted so far.
        pub async fn changes(&self) -> Vec<VisibilityChange> {
            self.changes.read().await.clone()
        }

        /// Returns the timeout requested for a receipt handle.
        pub async fn timeout_for(&self, receipt_handle: &str) -> Option<Duration> {
            self.changes
                .read()
                .await
                .iter()
                .find(|change| change.receipt_handle == receipt_handle)
                .map(|change| change.timeout)
        }
    }

    impl VisibilityQueue for MockQueue {
        fn change_visibility(
            &self,
            receipt_handle: String,
            timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
            let changes = self.changes.clone();
            let failing_handles = self.failing_handles.clone();

            Box::pin(async move {
                let fail = failing_handles.read().await.contains(&receipt_handle);
                changes
                    .write()
                    .await
                    .push(VisibilityChange { receipt_handle: receipt_handle.clone(), timeout });

                if fail {
                    return Err(QueueError::new(format!("receipt handle {receipt_handle} expired")));
                }
                Ok(())
            })
        }
    }
}
