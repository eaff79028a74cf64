//! Response status envelope
//!
//! Every acknowledgment the broker emits carries exactly one `ResponseStatus`.
//! Failures are built from `BrokerError` so codes stay consistent between the
//! channel and the producer-facing operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub success: bool,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_type: String,
    #[serde(default)]
    pub message: BTreeMap<String, String>,
}

impl ResponseStatus {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_code: String::new(),
            error_type: String::new(),
            message: BTreeMap::new(),
        }
    }

    pub fn failure(err: &BrokerError) -> Self {
        let mut message = BTreeMap::new();
        message.insert("detail".to_string(), err.to_string());
        match err {
            BrokerError::DuplicateRequest(id) | BrokerError::UnknownAck(id) => {
                message.insert("unique_id".to_string(), id.clone());
            }
            BrokerError::SessionClosed(session)
            | BrokerError::QueueFull(session)
            | BrokerError::NotConnected(session) => {
                message.insert("session_id".to_string(), session.clone());
            }
            BrokerError::DeviceNotFound {
                client_id,
                device_id,
            } => {
                message.insert("client_id".to_string(), client_id.clone());
                message.insert("device_id".to_string(), device_id.clone());
            }
            BrokerError::MalformedRequest(_) | BrokerError::FailedPrecondition(_) => {}
        }
        Self {
            success: false,
            error_code: err.code().to_string(),
            error_type: err.error_type().to_string(),
            message,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.message.insert(key.to_string(), value.into());
        self
    }

    /// Rank used when aggregating; higher is worse. Success is 0.
    pub fn severity(&self) -> u8 {
        if self.success {
            return 0;
        }
        match self.error_code.as_str() {
            "QueueFull" => 2,
            "SessionClosed" => 3,
            "DeviceNotFound" => 4,
            "DuplicateRequest" | "NotConnected" => 5,
            "FailedPrecondition" => 6,
            "MalformedRequest" => 7,
            _ => 1,
        }
    }

    /// Aggregate per-destination statuses into one.
    ///
    /// Succeeds iff every status succeeded (an empty set succeeds). Otherwise
    /// the most severe failure is reported, annotated with `delivered` and
    /// `failed` counts.
    pub fn worst_of<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a ResponseStatus>,
    {
        let mut delivered = 0usize;
        let mut failed = 0usize;
        let mut worst: Option<&ResponseStatus> = None;

        for status in statuses {
            if status.success {
                delivered += 1;
                continue;
            }
            failed += 1;
            if worst.is_none_or(|w| status.severity() > w.severity()) {
                worst = Some(status);
            }
        }

        let base = match worst {
            Some(w) => w.clone(),
            None => ResponseStatus::ok(),
        };
        base.with_detail("delivered", delivered.to_string())
            .with_detail("failed", failed.to_string())
    }
}

impl Default for ResponseStatus {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<BrokerError> for ResponseStatus {
    fn from(err: BrokerError) -> Self {
        ResponseStatus::failure(&err)
    }
}

impl From<Result<(), BrokerError>> for ResponseStatus {
    fn from(result: Result<(), BrokerError>) -> Self {
        match result {
            Ok(()) => ResponseStatus::ok(),
            Err(e) => ResponseStatus::failure(&e),
        }
    }
}
