//! The message envelope: the unit stored in a channel stream.
//!
//! Wire form is a UTF-8 JSON object with exactly `handle`, `message`,
//! `timestamp`, and `channel`. Unknown extra fields are ignored; a missing
//! field is a decode failure.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub handle: String,
    pub message: String,
    /// ISO-8601, stamped by the publisher rather than the broker.
    pub timestamp: String,
    pub channel: Channel,
}

/// Why a stored entry could not be turned back into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    Utf8,
    #[error("invalid envelope: {0}")]
    Json(String),
}

impl MessageEnvelope {
    /// Build an envelope stamped with the current UTC time.
    pub fn new(handle: impl Into<String>, message: impl Into<String>, channel: Channel) -> Self {
        Self::at(handle, message, channel, Utc::now())
    }

    pub fn at(
        handle: impl Into<String>,
        message: impl Into<String>,
        channel: Channel,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            handle: handle.into(),
            message: message.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            channel,
        }
    }

    /// The timestamp parsed back into a UTC instant, if it is valid RFC 3339.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| DecodeError::Utf8)?;
        serde_json::from_str(text).map_err(|err| DecodeError::Json(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_iso8601_utc_with_millis() {
        let envelope = MessageEnvelope::new("bob", "hi", Channel::Roadmap);
        assert!(envelope.timestamp.ends_with('Z'));
        assert_eq!(envelope.timestamp.len(), "2024-01-01T00:00:00.000Z".len());
        assert!(envelope.timestamp_utc().is_some());
    }

    #[test]
    fn encodes_exactly_four_fields() {
        let envelope = MessageEnvelope::new("bob", "hi", Channel::Errors);
        let value: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 4);
        assert_eq!(object["channel"], "errors");
        assert_eq!(object["handle"], "bob");
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let payload = br#"{"handle":"a","message":"m","timestamp":"2024-05-01T10:00:00.000Z","channel":"roadmap","extra":1}"#;
        let envelope = MessageEnvelope::decode(payload).unwrap();
        assert_eq!(envelope.handle, "a");
        assert_eq!(envelope.channel, Channel::Roadmap);
    }

    #[test]
    fn decode_rejects_missing_fields_and_garbage() {
        let missing = br#"{"handle":"a","message":"m","channel":"roadmap"}"#;
        assert!(matches!(
            MessageEnvelope::decode(missing),
            Err(DecodeError::Json(_))
        ));
        assert!(MessageEnvelope::decode(b"not json").is_err());
        assert_eq!(
            MessageEnvelope::decode(&[0xff, 0xfe]),
            Err(DecodeError::Utf8)
        );
    }

    #[test]
    fn empty_and_unicode_bodies_survive_encoding() {
        let envelope = MessageEnvelope::new("", "héllo ✓\nline two", Channel::Coordination);
        let back = MessageEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(back, envelope);
    }
}
