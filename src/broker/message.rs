//! Channel message definitions
//!
//! These are the typed entities exchanged over a live channel. The transport
//! encodes them as JSON text frames; enumerated envelopes are internally
//! tagged by `type` so each frame carries exactly one variant.
//!
//! Notes on fields:
//! - `unique_id`: caller-chosen correlation token. The broker picks its own
//!   ids for the events it pushes, and peers echo them back in
//!   `ChannelEventAck`.
//! - `event`: optional on the wire so that a missing event is reported as a
//!   `MalformedRequest` status instead of a decode failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::broker::status::ResponseStatus;
use crate::utils::BrokerError;

/// How an event payload was encoded by its producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventFormat {
    #[default]
    Json,
    Proto,
}

/// Application payload. Immutable once built; fan-out shares it behind `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    name: String,
    #[serde(default)]
    format_type: EventFormat,
    #[serde(default)]
    type_url: String,
    #[serde(with = "base64_bytes", default)]
    data: Vec<u8>,
}

impl Event {
    /// Build a JSON event from any serializable value.
    pub fn json<T: Serialize>(name: &str, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name: name.to_string(),
            format_type: EventFormat::Json,
            type_url: String::new(),
            data: serde_json::to_vec(value)?,
        })
    }

    /// Build a protobuf event from already-encoded bytes.
    pub fn proto(name: &str, type_url: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            format_type: EventFormat::Proto,
            type_url: type_url.to_string(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format_type(&self) -> EventFormat {
        self.format_type
    }

    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Check the event is well formed: named, and JSON payloads parse.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.name.is_empty() {
            return Err(BrokerError::MalformedRequest("event name is empty".into()));
        }
        if self.format_type == EventFormat::Json
            && serde_json::from_slice::<IgnoredAny>(&self.data).is_err()
        {
            return Err(BrokerError::MalformedRequest(format!(
                "event '{}' is tagged JSON but its payload is not JSON",
                self.name
            )));
        }
        Ok(())
    }
}

/// An event travelling over a live channel, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub unique_id: String,
    pub topic: String,
    #[serde(default)]
    pub event: Option<Arc<Event>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEventAck {
    pub unique_id: String,
    pub status: ResponseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAck {
    pub status: ResponseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSubscriptionRequest {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSubscriptionRequestAck {
    pub topic: String,
    pub status: ResponseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicUnsubscriptionRequest {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicUnsubscriptionRequestAck {
    pub topic: String,
    pub status: ResponseStatus,
}

/// Everything a peer may send on its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelRequest {
    ChannelEvent(ChannelEvent),
    ChannelEventAck(ChannelEventAck),
    TopicSubscriptionRequest(TopicSubscriptionRequest),
    TopicUnsubscriptionRequest(TopicUnsubscriptionRequest),
}

/// Everything the broker may send on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelResponse {
    ConnectAck(ConnectAck),
    ChannelEvent(ChannelEvent),
    ChannelEventAck(ChannelEventAck),
    TopicSubscriptionRequestAck(TopicSubscriptionRequestAck),
    TopicUnsubscriptionRequestAck(TopicUnsubscriptionRequestAck),
}

/// One connected endpoint of a client, as it was at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub logged_in_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Device {
    pub fn new(id: &str, attributes: BTreeMap<String, String>) -> Self {
        Self {
            id: id.to_string(),
            logged_in_at: Utc::now(),
            attributes,
        }
    }
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
