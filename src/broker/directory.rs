//! Device directory
//!
//! Tracks which (client, device) pairs currently have a live session. A client
//! may have several devices online at once; each device entry is bound to
//! exactly one session. Entries are snapshots taken at bind time: attribute
//! values are never updated afterwards.
//!
//! Two indices are kept, per client and per session, so that `unbind` on
//! session close does not scan every client.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::broker::message::Device;
use crate::broker::topic::SessionId;

#[derive(Debug, Clone)]
struct Binding {
    device: Device,
    session: SessionId,
}

#[derive(Debug, Default)]
pub struct DeviceDirectory {
    clients: DashMap<String, Vec<Binding>>,
    sessions: DashMap<SessionId, (String, String)>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `device_id` of `client_id` to `session`.
    ///
    /// A device that is already bound to another session is taken over by
    /// the new one; the older session stays connected but no longer receives
    /// device-addressed events.
    pub fn bind(
        &self,
        client_id: &str,
        device_id: &str,
        session: &SessionId,
        logged_in_at: DateTime<Utc>,
        attributes: BTreeMap<String, String>,
    ) {
        let binding = Binding {
            device: Device {
                id: device_id.to_string(),
                logged_in_at,
                attributes,
            },
            session: session.clone(),
        };

        let replaced = {
            let mut bindings = self.clients.entry(client_id.to_string()).or_default();
            let replaced = match bindings.iter().position(|b| b.device.id == device_id) {
                Some(idx) => Some(bindings.remove(idx).session),
                None => None,
            };
            bindings.push(binding);
            replaced
        };

        if let Some(old) = replaced {
            self.sessions
                .remove_if(&old, |_, (c, d)| c == client_id && d == device_id);
            info!(client_id, device_id, old_session = %old, new_session = %session, "device rebound to new session");
        }

        self.sessions
            .insert(session.clone(), (client_id.to_string(), device_id.to_string()));
    }

    /// Remove whatever device binding `session` holds. Returns the
    /// `(client_id, device_id)` pair that was unbound, if any.
    pub fn unbind(&self, session: &SessionId) -> Option<(String, String)> {
        let (_, (client_id, device_id)) = self.sessions.remove(session)?;

        if let Some(mut bindings) = self.clients.get_mut(&client_id) {
            bindings.retain(|b| &b.session != session);
        }
        self.clients
            .remove_if(&client_id, |_, bindings| bindings.is_empty());

        Some((client_id, device_id))
    }

    pub fn is_online(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|bindings| !bindings.is_empty())
    }

    /// Online devices of `client_id`, in bind order.
    pub fn active_devices(&self, client_id: &str) -> Vec<Device> {
        self.clients
            .get(client_id)
            .map(|bindings| bindings.iter().map(|b| b.device.clone()).collect())
            .unwrap_or_default()
    }

    /// Sessions of every online device of `client_id`.
    pub fn sessions_of(&self, client_id: &str) -> Vec<SessionId> {
        self.clients
            .get(client_id)
            .map(|bindings| bindings.iter().map(|b| b.session.clone()).collect())
            .unwrap_or_default()
    }

    /// The session bound to one device, if any.
    pub fn session_of(&self, client_id: &str, device_id: &str) -> Option<SessionId> {
        self.clients.get(client_id).and_then(|bindings| {
            bindings
                .iter()
                .find(|b| b.device.id == device_id)
                .map(|b| b.session.clone())
        })
    }

    /// The `(client_id, device_id)` pair bound to `session`, if any.
    pub fn identity_of(&self, session: &SessionId) -> Option<(String, String)> {
        self.sessions.get(session).map(|entry| entry.value().clone())
    }

    pub fn online_client_count(&self) -> usize {
        self.clients.len()
    }
}
