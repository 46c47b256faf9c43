//! Inbound queue records and the batch response returned for them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Record attribute carrying the number of deliveries so far.
pub const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";

/// One inbound queue record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    /// Queue-assigned message identifier.
    pub message_id: String,

    /// UTF-8 message body.
    #[serde(default)]
    pub body: String,

    /// Opaque handle used to change the record's visibility.
    #[serde(default)]
    pub receipt_handle: String,

    /// Delivery attributes.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl QueueRecord {
    /// Number of times the record has been delivered, 1 when unknown.
    pub fn receive_count(&self) -> u32 {
        self.attributes
            .get(RECEIVE_COUNT_ATTRIBUTE)
            .and_then(|count| count.trim().parse::<u32>().ok())
            .unwrap_or(1)
    }
}

/// Answer returned to the queue for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// Records the queue must redeliver.
    pub batch_item_failures: Vec<BatchItemFailure>,
}

/// One record the queue must redeliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    /// Message identifier of the failed record.
    pub item_identifier: String,
}

impl BatchResponse {
    /// Builds a response from failed message identifiers.
    pub fn from_failures<I, S>(message_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            batch_item_failures: message_ids
                .into_iter()
                .map(|id| BatchItemFailure { item_identifier: id.into() })
                .collect(),
        }
    }

    /// Identifiers of the failed records.
    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.batch_item_failures.iter().map(|failure| failure.item_identifier.as_str())
    }
}
