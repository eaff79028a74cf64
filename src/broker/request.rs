//! Producer-facing requests and responses.
//!
//! These are the operations backend services call to push events into live
//! channels, plus the device presence query.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::broker::message::{Device, Event};
use crate::broker::status::ResponseStatus;
use crate::utils::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetClientActiveDevicesRequest {
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetClientActiveDevicesResponse {
    pub status: ResponseStatus,
    pub is_client_online: bool,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventToTopicRequest {
    pub topic: String,
    #[serde(default)]
    pub event: Option<Arc<Event>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventToTopicResponse {
    pub status: ResponseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventToTopicsRequest {
    #[serde(default)]
    pub requests: Vec<SendEventToTopicRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventToTopicsResponse {
    pub status: ResponseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventToClientChannelRequest {
    pub client_id: String,
    #[serde(default)]
    pub event: Option<Arc<Event>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventToClientChannelResponse {
    pub status: ResponseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventToClientDeviceChannelRequest {
    pub client_id: String,
    pub device_id: String,
    #[serde(default)]
    pub event: Option<Arc<Event>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventToClientDeviceChannelResponse {
    pub status: ResponseStatus,
}

/// Require a non-empty identifier field.
pub(crate) fn require(field: &str, value: &str) -> Result<(), BrokerError> {
    if value.trim().is_empty() {
        return Err(BrokerError::MalformedRequest(format!("{field} is required")));
    }
    Ok(())
}

/// Require a present, well-formed event.
pub(crate) fn require_event(event: Option<&Arc<Event>>) -> Result<Arc<Event>, BrokerError> {
    let event = event.ok_or_else(|| BrokerError::MalformedRequest("event is required".into()))?;
    event.validate()?;
    Ok(Arc::clone(event))
}
