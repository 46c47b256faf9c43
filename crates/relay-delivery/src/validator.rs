//! Decoding and validation of inbound queue bodies.
//!
//! Validation happens before any network activity so a message that can
//! never be delivered is rejected without touching the client cache.

use relay_core::{Batch, BatchEnvironment, CoreError, OutgoingMessage};
use tracing::debug;

use crate::error::{Result, SubmissionError};

/// Largest serialized batch the remote API accepts, in bytes.
pub const MAX_BATCH_SIZE_BYTES: usize = 256_000;

/// Validates raw queue bodies into `OutgoingMessage`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageValidator {
    environment: BatchEnvironment,
}

impl MessageValidator {
    /// Creates a validator sizing batches for the given environment.
    pub fn new(environment: BatchEnvironment) -> Self {
        Self { environment }
    }

    /// Decodes and validates one queue body.
    ///
    /// # Errors
    ///
    /// - `UnparseablePayload` when the body does not decode or its subject
    ///   identifier is not valid hexadecimal
    /// - `MissingCredentialKey` / `MissingCredentialSecret` when a credential
    ///   is absent or empty
    /// - `PayloadTooLarge` when the outbound batch exceeds
    ///   [`MAX_BATCH_SIZE_BYTES`]
    pub fn validate(&self, raw_body: &[u8]) -> Result<OutgoingMessage> {
        let message = OutgoingMessage::from_slice(raw_body).map_err(|e| {
            SubmissionError::unparseable(format!(
                "could not deserialize message {}: {e}",
                excerpt(raw_body)
            ))
        })?;

        if message.authentication_key.is_empty() {
            return Err(SubmissionError::MissingCredentialKey);
        }
        if message.authentication_secret.is_empty() {
            return Err(SubmissionError::MissingCredentialSecret);
        }

        let size_bytes = self.batch_size(&message)?;
        debug!(size_bytes, events = message.events.len(), "validated message");

        if size_bytes > MAX_BATCH_SIZE_BYTES {
            return Err(SubmissionError::payload_too_large(size_bytes, message));
        }

        Ok(message)
    }

    /// Computes the serialized size of the message's outbound batch.
    fn batch_size(&self, message: &OutgoingMessage) -> Result<usize> {
        encode_batch(message, self.environment).map(|bytes| bytes.len())
    }
}

/// Translates a message into the exact bytes posted to the remote API.
pub(crate) fn encode_batch(
    message: &OutgoingMessage,
    environment: BatchEnvironment,
) -> Result<Vec<u8>> {
    let batch = Batch::from_message(message, environment).map_err(|e| match e {
        CoreError::Serialization(message) => SubmissionError::configuration(message),
        other => SubmissionError::unparseable(other.to_string()),
    })?;

    batch.to_json_bytes().map_err(|e| SubmissionError::configuration(e.to_string()))
}

/// Returns a bounded, lossy UTF-8 excerpt of a body for error messages.
fn excerpt(raw_body: &[u8]) -> String {
    const MAX_EXCERPT_BYTES: usize = 512;

    if raw_body.len() > MAX_EXCERPT_BYTES {
        format!("{}... (truncated)", String::from_utf8_lossy(&raw_body[..MAX_EXCERPT_BYTES]))
    } else {
        String::from_utf8_lossy(raw_body).into_owned()
    }
}
