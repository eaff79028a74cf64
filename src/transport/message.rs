//! Wire envelopes for the WebSocket transport.
//!
//! Channel connections exchange `ChannelRequest`/`ChannelResponse` (defined
//! with the broker). Producer connections on the service path exchange
//! `ServiceRequest`/`ServiceResponse` below. Every frame is one JSON text
//! message tagged by `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::metrics::MetricsSnapshot;
use crate::broker::request::{
    GetClientActiveDevicesRequest, GetClientActiveDevicesResponse, SendEventToClientChannelRequest,
    SendEventToClientChannelResponse, SendEventToClientDeviceChannelRequest,
    SendEventToClientDeviceChannelResponse, SendEventToTopicRequest, SendEventToTopicResponse,
    SendEventToTopicsRequest, SendEventToTopicsResponse,
};
use crate::broker::status::ResponseStatus;
use crate::utils::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceRequest {
    GetClientActiveDevices(GetClientActiveDevicesRequest),
    SendEventToTopic(SendEventToTopicRequest),
    SendEventToTopics(SendEventToTopicsRequest),
    SendEventToClientChannel(SendEventToClientChannelRequest),
    SendEventToClientDeviceChannel(SendEventToClientDeviceChannelRequest),
    GetMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceResponse {
    GetClientActiveDevices(GetClientActiveDevicesResponse),
    SendEventToTopic(SendEventToTopicResponse),
    SendEventToTopics(SendEventToTopicsResponse),
    SendEventToClientChannel(SendEventToClientChannelResponse),
    SendEventToClientDeviceChannel(SendEventToClientDeviceChannelResponse),
    Metrics(MetricsSnapshot),
    /// The request frame could not be decoded.
    Error { status: ResponseStatus },
}

/// Decode one text frame, reporting failures as `MalformedRequest`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, BrokerError> {
    serde_json::from_str(text).map_err(|e| BrokerError::MalformedRequest(e.to_string()))
}

/// Encode a message as a text frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<WsMessage, serde_json::Error> {
    Ok(WsMessage::Text(serde_json::to_string(msg)?.into()))
}
