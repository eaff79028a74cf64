//! Broker error kinds.
//!
//! Every application-level failure in the broker is one of these variants.
//! They never travel as transport failures: `broker::status` turns each one
//! into a `ResponseStatus` with a stable `error_code` (the variant name) and a
//! coarse `error_type` category.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("unique_id '{0}' is already pending on this session")]
    DuplicateRequest(String),

    #[error("session {0} closed before the event was acknowledged")]
    SessionClosed(String),

    #[error("no live session for device '{device_id}' of client '{client_id}'")]
    DeviceNotFound {
        client_id: String,
        device_id: String,
    },

    #[error("ack for unknown unique_id '{0}'")]
    UnknownAck(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("outbound queue of session {0} is full")]
    QueueFull(String),

    #[error("session {0} is not connected")]
    NotConnected(String),
}

impl BrokerError {
    /// Machine-readable code reported in `ResponseStatus::error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::DuplicateRequest(_) => "DuplicateRequest",
            BrokerError::SessionClosed(_) => "SessionClosed",
            BrokerError::DeviceNotFound { .. } => "DeviceNotFound",
            BrokerError::UnknownAck(_) => "UnknownAck",
            BrokerError::MalformedRequest(_) => "MalformedRequest",
            BrokerError::FailedPrecondition(_) => "FailedPrecondition",
            BrokerError::QueueFull(_) => "QueueFull",
            BrokerError::NotConnected(_) => "NotConnected",
        }
    }

    /// Coarse category reported in `ResponseStatus::error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            BrokerError::DuplicateRequest(_) => "Conflict",
            BrokerError::SessionClosed(_) => "Unavailable",
            BrokerError::DeviceNotFound { .. } => "ClientOffline",
            BrokerError::UnknownAck(_) => "NotFound",
            BrokerError::MalformedRequest(_) => "InvalidArgument",
            BrokerError::FailedPrecondition(_) | BrokerError::NotConnected(_) => {
                "FailedPrecondition"
            }
            BrokerError::QueueFull(_) => "ResourceExhausted",
        }
    }
}
