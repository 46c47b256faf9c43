//! Inbound message and event models.
//!
//! An `OutgoingMessage` is decoded from exactly one queue record body. It is
//! never mutated after decoding; the relay borrows it for validation and
//! submission and drops it once the attempt completes.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// One message read from the queue, addressed to the remote event API.
///
/// Field names follow the camelCase JSON produced by upstream publishers.
/// Unknown fields are ignored so publishers can add fields ahead of the
/// relay.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// API key used to authenticate against the remote API.
    #[serde(default, deserialize_with = "null_as_default")]
    pub authentication_key: String,

    /// API secret paired with `authentication_key`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub authentication_secret: String,

    /// Base URL override for the remote API. Empty means "use the default".
    #[serde(default, rename = "apiURL", skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// ISO-8601 timestamp of the occurrence, if the publisher supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Subject identifier as an unsigned 64-bit hexadecimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_mp_id: Option<String>,

    /// Subject e-mail address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_email: Option<String>,

    /// Events to submit, in publisher order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<Event>,
}

impl OutgoingMessage {
    /// Decodes a message from a raw queue body.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Malformed` when the body is not JSON of the
    /// expected shape.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Returns the base URL override when one is set and non-empty.
    pub fn api_url_override(&self) -> Option<&str> {
        self.api_url.as_deref().filter(|url| !url.is_empty())
    }

    /// Returns the best available subject reference for log lines.
    pub fn subject(&self) -> &str {
        self.profile_mp_id
            .as_deref()
            .or(self.profile_email.as_deref())
            .unwrap_or("<unknown>")
    }
}

/// A single domain occurrence carried by an `OutgoingMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// What happened.
    pub event_name: EventName,

    /// Remote API category for the occurrence.
    pub event_type: EventType,

    /// Custom attributes forwarded verbatim.
    #[serde(default, deserialize_with = "null_as_default")]
    pub additional_data: HashMap<String, String>,
}

impl Event {
    /// Creates an event with no custom attributes.
    pub fn new(event_name: EventName, event_type: EventType) -> Self {
        Self { event_name, event_type, additional_data: HashMap::new() }
    }

    /// Adds a custom attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }
}

/// Names of the events the relay knows how to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    /// Subject subscribed to an e-mail list.
    EmailSubscribe,
    /// Subject unsubscribed from an e-mail list.
    EmailUnsubscribe,
    /// Subject opened an e-mail.
    EmailOpen,
    /// Subject clicked a link in an e-mail.
    EmailClick,
    /// E-mail to the subject bounced.
    EmailBounce,
    /// Subject reported an e-mail as spam.
    EmailSpamReport,
    /// Subject completed a purchase.
    Purchase,
    /// Subject profile fields changed.
    ProfileUpdate,
}

impl EventName {
    /// Returns the wire name, identical to the inbound spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailSubscribe => "EMAIL_SUBSCRIBE",
            Self::EmailUnsubscribe => "EMAIL_UNSUBSCRIBE",
            Self::EmailOpen => "EMAIL_OPEN",
            Self::EmailClick => "EMAIL_CLICK",
            Self::EmailBounce => "EMAIL_BOUNCE",
            Self::EmailSpamReport => "EMAIL_SPAM_REPORT",
            Self::Purchase => "PURCHASE",
            Self::ProfileUpdate => "PROFILE_UPDATE",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom event categories understood by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Navigation within a product.
    Navigation,
    /// Location change.
    Location,
    /// Search performed.
    Search,
    /// Commercial transaction.
    Transaction,
    /// User generated content.
    UserContent,
    /// Preference or consent change.
    UserPreference,
    /// Social interaction.
    Social,
    /// Media interaction.
    Media,
    /// Anything else.
    Other,
}

impl EventType {
    /// Returns the outbound `custom_event_type` value.
    pub fn custom_event_type(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Location => "location",
            Self::Search => "search",
            Self::Transaction => "transaction",
            Self::UserContent => "user_content",
            Self::UserPreference => "user_preference",
            Self::Social => "social",
            Self::Media => "media",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.custom_event_type())
    }
}

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
