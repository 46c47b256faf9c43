//! Core domain models for the event relay.
//!
//! Defines the inbound queue record and message shape, the events a message
//! carries, and the outbound batch representation submitted to the remote
//! event-ingestion API. Every other crate in the workspace builds on these
//! types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod error;
pub mod models;
pub mod record;
pub mod time;

pub use batch::{Batch, BatchEnvironment, BatchEvent, CustomEventData, UserIdentities};
pub use error::{CoreError, Result};
pub use models::{Event, EventName, EventType, OutgoingMessage};
pub use record::{BatchItemFailure, BatchResponse, QueueRecord, RECEIVE_COUNT_ATTRIBUTE};
pub use time::{Clock, RealClock, TestClock};
