//! Builders for queue records and outgoing messages.
//!
//! Defaults produce a deliverable message: credentials set, one
//! `EMAIL_SUBSCRIBE` event, no base URL override.

use std::collections::HashMap;

use relay_core::{
    Event, EventName, EventType, OutgoingMessage, QueueRecord, RECEIVE_COUNT_ATTRIBUTE,
};
use uuid::Uuid;

/// Builder for outgoing messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: OutgoingMessage,
}

impl MessageBuilder {
    /// Creates a builder with test credentials and one event.
    pub fn new() -> Self {
        Self {
            message: OutgoingMessage {
                authentication_key: "test_key".to_string(),
                authentication_secret: "test_secret".to_string(),
                profile_email: Some("subscriber@example.com".to_string()),
                timestamp: Some("2024-05-03T14:12:00.000Z".to_string()),
                events: vec![Event::new(EventName::EmailSubscribe, EventType::Other)
                    .with_attribute("client_id", "3386")],
                ..Default::default()
            },
        }
    }

    /// Sets the credential pair.
    #[must_use]
    pub fn credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.message.authentication_key = key.into();
        self.message.authentication_secret = secret.into();
        self
    }

    /// Clears the credential key.
    #[must_use]
    pub fn without_key(mut self) -> Self {
        self.message.authentication_key.clear();
        self
    }

    /// Clears the credential secret.
    #[must_use]
    pub fn without_secret(mut self) -> Self {
        self.message.authentication_secret.clear();
        self
    }

    /// Overrides the remote API base URL.
    #[must_use]
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.message.api_url = Some(url.into());
        self
    }

    /// Sets the hexadecimal subject identifier.
    #[must_use]
    pub fn mp_id(mut self, mp_id: impl Into<String>) -> Self {
        self.message.profile_mp_id = Some(mp_id.into());
        self
    }

    /// Appends an event.
    #[must_use]
    pub fn event(mut self, event: Event) -> Self {
        self.message.events.push(event);
        self
    }

    /// Pads the first event with an attribute of `len` bytes.
    #[must_use]
    pub fn padded(mut self, len: usize) -> Self {
        if self.message.events.is_empty() {
            self.message.events.push(Event::new(EventName::EmailOpen, EventType::Other));
        }
        self.message.events[0].additional_data.insert("padding".to_string(), "x".repeat(len));
        self
    }

    /// Builds the message.
    pub fn build(self) -> OutgoingMessage {
        self.message
    }

    /// Builds the message as a queue body.
    pub fn to_body(&self) -> String {
        serde_json::to_string(&self.message).expect("message always serializes")
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for inbound queue records.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    message_id: String,
    body: String,
    receipt_handle: Option<String>,
    receive_count: Option<u32>,
}

impl RecordBuilder {
    /// Creates a record with a random identifier and the default message.
    pub fn new() -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            body: MessageBuilder::new().to_body(),
            receipt_handle: None,
            receive_count: None,
        }
    }

    /// Sets the message identifier.
    #[must_use]
    pub fn id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Uses the body produced by a message builder.
    #[must_use]
    pub fn message(mut self, message: &MessageBuilder) -> Self {
        self.body = message.to_body();
        self
    }

    /// Sets a raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the receipt handle, `rh-<message id>` by default.
    #[must_use]
    pub fn receipt_handle(mut self, receipt_handle: impl Into<String>) -> Self {
        self.receipt_handle = Some(receipt_handle.into());
        self
    }

    /// Sets the approximate receive count attribute.
    #[must_use]
    pub fn receive_count(mut self, count: u32) -> Self {
        self.receive_count = Some(count);
        self
    }

    /// Builds the record.
    pub fn build(self) -> QueueRecord {
        let mut attributes = HashMap::new();
        if let Some(count) = self.receive_count {
            attributes.insert(RECEIVE_COUNT_ATTRIBUTE.to_string(), count.to_string());
        }

        QueueRecord {
            receipt_handle: self
                .receipt_handle
                .unwrap_or_else(|| format!("rh-{}", self.message_id)),
            message_id: self.message_id,
            body: self.body,
            attributes,
        }
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}
