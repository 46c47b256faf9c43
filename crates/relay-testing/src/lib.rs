//! Test support for the event relay.
//!
//! Fixture builders for queue records and messages, plus a wiremock-backed
//! stand-in for the remote event API.

pub mod fixtures;
pub mod http;

pub use fixtures::{MessageBuilder, RecordBuilder};
pub use http::{MockEndpoint, MockEventsApi, MockResponse, RecordedRequest};
pub use relay_core::TestClock;
