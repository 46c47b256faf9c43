//! Outbound batch representation for the remote event API.
//!
//! A `Batch` is the translated form of one `OutgoingMessage`. Its serialized
//! size, not the size of the inbound body, is what the remote API limits,
//! so sizing checks run against `Batch::to_json_bytes`.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::{CoreError, Result},
    models::{Event, OutgoingMessage},
};

/// Remote API environment a batch is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchEnvironment {
    /// Development data set.
    #[default]
    Development,
    /// Production data set.
    Production,
}

impl fmt::Display for BatchEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl FromStr for BatchEnvironment {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(CoreError::InvalidInput(format!("unknown batch environment: {other}"))),
        }
    }
}

/// Batch payload accepted by the remote event API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Target environment.
    pub environment: BatchEnvironment,

    /// Known identities of the subject.
    pub user_identities: UserIdentities,

    /// Subject identifier, as the API's signed 64-bit representation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpid: Option<i64>,

    /// Occurrence time in milliseconds since the UNIX epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_unixtime_ms: Option<i64>,

    /// Translated events.
    pub events: Vec<BatchEvent>,
}

/// Identity block of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserIdentities {
    /// Subject e-mail address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// One event inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEvent {
    /// Always `custom_event` for relayed events.
    pub event_type: String,

    /// Event payload.
    pub data: CustomEventData,
}

/// Payload of a custom event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEventData {
    /// Event name.
    pub event_name: String,

    /// Custom event category.
    pub custom_event_type: String,

    /// Attributes copied from the inbound event.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub custom_attributes: HashMap<String, String>,
}

impl From<&Event> for BatchEvent {
    fn from(event: &Event) -> Self {
        Self {
            event_type: "custom_event".to_string(),
            data: CustomEventData {
                event_name: event.event_name.as_str().to_string(),
                custom_event_type: event.event_type.custom_event_type().to_string(),
                custom_attributes: event.additional_data.clone(),
            },
        }
    }
}

impl Batch {
    /// Translates a message into its outbound batch.
    ///
    /// Unparseable timestamps are logged and dropped; the event is still
    /// worth delivering without one.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when the subject identifier is not
    /// an unsigned 64-bit hexadecimal number.
    pub fn from_message(message: &OutgoingMessage, environment: BatchEnvironment) -> Result<Self> {
        let mpid = message.profile_mp_id.as_deref().map(parse_mpid).transpose()?;

        Ok(Self {
            environment,
            user_identities: UserIdentities { email: message.profile_email.clone() },
            mpid,
            timestamp_unixtime_ms: message.timestamp.as_deref().and_then(parse_timestamp_ms),
            events: message.events.iter().map(BatchEvent::from).collect(),
        })
    }

    /// Serializes the batch exactly as it is sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Parses a hexadecimal subject identifier.
///
/// The identifier is unsigned on input; the API takes a signed 64-bit value,
/// so the bit pattern is reinterpreted rather than range checked.
fn parse_mpid(raw: &str) -> Result<i64> {
    let unsigned = u64::from_str_radix(raw.trim(), 16)
        .map_err(|e| CoreError::InvalidInput(format!("invalid profile identifier {raw:?}: {e}")))?;
    Ok(i64::from_be_bytes(unsigned.to_be_bytes()))
}

fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    if raw.is_empty() {
        return None;
    }

    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed.timestamp_millis()),
        Err(e) => {
            warn!(timestamp = raw, error = %e, "failed to parse message timestamp");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventName, EventType};

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            authentication_key: "key".to_string(),
            authentication_secret: "secret".to_string(),
            profile_email: Some("someone@example.com".to_string()),
            events: vec![Event::new(EventName::EmailSubscribe, EventType::Other)
                .with_attribute("client_id", "3386")],
            ..Default::default()
        }
    }

    #[test]
    fn events_translate_to_custom_events() {
        let batch = Batch::from_message(&message(), BatchEnvironment::Development).unwrap();

        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].event_type, "custom_event");
        assert_eq!(batch.events[0].data.event_name, "EMAIL_SUBSCRIBE");
        assert_eq!(batch.events[0].data.custom_event_type, "other");
        assert_eq!(batch.events[0].data.custom_attributes["client_id"], "3386");
        assert_eq!(batch.user_identities.email.as_deref(), Some("someone@example.com"));
    }

    #[test]
    fn mpid_parsed_from_hex_with_wrapping() {
        assert_eq!(parse_mpid("ff").unwrap(), 255);
        assert_eq!(parse_mpid("ffffffffffffffff").unwrap(), -1);
        assert!(parse_mpid("not-hex").is_err());
    }

    #[test]
    fn invalid_mpid_fails_translation() {
        let mut message = message();
        message.profile_mp_id = Some("zz".to_string());

        let result = Batch::from_message(&message, BatchEnvironment::Production);
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn timestamp_converted_to_epoch_millis() {
        assert_eq!(parse_timestamp_ms("1970-01-01T00:00:01.500Z"), Some(1500));
        assert_eq!(parse_timestamp_ms("2024-05-01T12:00:00+02:00"), Some(1_714_557_600_000));
        assert_eq!(parse_timestamp_ms("yesterday"), None);
        assert_eq!(parse_timestamp_ms(""), None);
    }

    #[test]
    fn absent_values_omitted_from_json() {
        let mut message = message();
        message.profile_email = None;
        message.events[0].additional_data.clear();

        let batch = Batch::from_message(&message, BatchEnvironment::Development).unwrap();
        let json = String::from_utf8(batch.to_json_bytes().unwrap()).unwrap();

        assert_eq!(
            json,
            r#"{"environment":"development","user_identities":{},"events":[{"event_type":"custom_event","data":{"event_name":"EMAIL_SUBSCRIBE","custom_event_type":"other"}}]}"#
        );
    }

    #[test]
    fn environment_parses_case_insensitively() {
        assert_eq!("Production".parse::<BatchEnvironment>().unwrap(), BatchEnvironment::Production);
        assert!("staging".parse::<BatchEnvironment>().is_err());
    }
}
