//! Error types for message submission and queue control.
//!
//! Every way a message can fail is a `SubmissionError` value carrying its
//! classification. Terminal failures are acknowledged and dropped; retryable
//! failures are handed back to the queue for redelivery.

use std::fmt;

use relay_core::OutgoingMessage;
use thiserror::Error;

/// Result type alias for submission operations.
pub type Result<T> = std::result::Result<T, SubmissionError>;

/// Whether a failed message may succeed on a later delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Redelivery cannot help; acknowledge and drop the message.
    Terminal,
    /// Ask the queue to offer the message again later.
    Retryable,
}

/// Failure to validate or submit one message.
#[derive(Debug, Clone, Error)]
pub enum SubmissionError {
    /// Message body could not be decoded.
    #[error("unparseable payload: {message}")]
    UnparseablePayload {
        /// Decoder error message
        message: String,
    },

    /// Credential key missing or empty.
    #[error("authentication key not provided")]
    MissingCredentialKey,

    /// Credential secret missing or empty.
    #[error("authentication secret not provided")]
    MissingCredentialSecret,

    /// Outbound batch exceeds the remote API size limit.
    #[error("payload too large ({size_bytes} bytes)")]
    PayloadTooLarge {
        /// Serialized size of the outbound batch
        size_bytes: usize,
        /// Message that produced the batch
        original: Box<OutgoingMessage>,
    },

    /// Remote API asked the caller to slow down (HTTP 429).
    #[error("rate limited: HTTP {status_code} {message}")]
    RateLimited {
        /// HTTP status code
        status_code: u16,
        /// Response reason or body excerpt
        message: String,
        /// Seconds to wait before redelivery, 0 when unknown
        retry_after_seconds: u64,
    },

    /// Remote API returned a 4xx or 5xx status other than 429.
    #[error("remote error: HTTP {status_code} {message}")]
    RemoteError {
        /// HTTP status code
        status_code: u16,
        /// Response reason or body excerpt
        message: String,
    },

    /// Remote API returned a non-success status outside 400-599.
    #[error("unexpected status: HTTP {status_code} {message}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
        /// Response reason or body excerpt
        message: String,
    },

    /// Connection, timeout or other transport fault.
    #[error("transport failure: {message}")]
    Transport {
        /// Transport error message
        message: String,
    },

    /// Client for the message's credentials could not be built.
    #[error("invalid client configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl SubmissionError {
    /// Creates an unparseable payload error.
    pub fn unparseable(message: impl Into<String>) -> Self {
        Self::UnparseablePayload { message: message.into() }
    }

    /// Creates a payload too large error.
    pub fn payload_too_large(size_bytes: usize, original: OutgoingMessage) -> Self {
        Self::PayloadTooLarge { size_bytes, original: Box::new(original) }
    }

    /// Creates a rate limit error with retry guidance.
    pub fn rate_limited(
        status_code: u16,
        message: impl Into<String>,
        retry_after_seconds: u64,
    ) -> Self {
        Self::RateLimited { status_code, message: message.into(), retry_after_seconds }
    }

    /// Creates a remote error from an HTTP error response.
    pub fn remote(status_code: u16, message: impl Into<String>) -> Self {
        Self::RemoteError { status_code, message: message.into() }
    }

    /// Creates an unexpected status error.
    pub fn unexpected_status(status_code: u16, message: impl Into<String>) -> Self {
        Self::UnexpectedStatus { status_code, message: message.into() }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Classifies the failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::PayloadTooLarge { .. }
            | Self::RateLimited { .. }
            | Self::RemoteError { .. }
            | Self::Transport { .. } => FailureKind::Retryable,

            Self::UnparseablePayload { .. }
            | Self::MissingCredentialKey
            | Self::MissingCredentialSecret
            | Self::UnexpectedStatus { .. }
            | Self::Configuration { .. } => FailureKind::Terminal,
        }
    }

    /// Returns `true` when the queue should redeliver the message.
    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Retryable
    }

    /// Returns the HTTP status code, or 0 when no response was received.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RateLimited { status_code, .. }
            | Self::RemoteError { status_code, .. }
            | Self::UnexpectedStatus { status_code, .. } => *status_code,
            _ => 0,
        }
    }

    /// Returns the remote retry hint in seconds, or 0 when none was given.
    pub fn retry_after_seconds(&self) -> u64 {
        match self {
            Self::RateLimited { retry_after_seconds, .. } => *retry_after_seconds,
            _ => 0,
        }
    }
}

/// Category of submission failure for metrics and log labelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Message failed local validation.
    Validation,
    /// Message too large to submit.
    Size,
    /// Rate limiting.
    RateLimit,
    /// HTTP error status from the remote API.
    Remote,
    /// Network connectivity issues.
    Transport,
    /// Client configuration problems.
    Configuration,
}

impl From<&SubmissionError> for ErrorCategory {
    fn from(error: &SubmissionError) -> Self {
        match error {
            SubmissionError::UnparseablePayload { .. }
            | SubmissionError::MissingCredentialKey
            | SubmissionError::MissingCredentialSecret => Self::Validation,
            SubmissionError::PayloadTooLarge { .. } => Self::Size,
            SubmissionError::RateLimited { .. } => Self::RateLimit,
            SubmissionError::RemoteError { .. } | SubmissionError::UnexpectedStatus { .. } => {
                Self::Remote
            },
            SubmissionError::Transport { .. } => Self::Transport,
            SubmissionError::Configuration { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Size => write!(f, "size"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Remote => write!(f, "remote"),
            Self::Transport => write!(f, "transport"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Failure of a queue control operation.
#[derive(Debug, Clone, Error)]
#[error("queue operation failed: {message}")]
pub struct QueueError {
    /// Error message from the queue
    pub message: String,
}

impl QueueError {
    /// Creates a queue error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
