//! Channel session
//!
//! One `ChannelSession` per connection. It moves through
//! `Unconnected -> Connected -> Closed` and turns each decoded
//! `ChannelRequest` into exactly one typed acknowledgment (except peer acks,
//! which are consumed silently). The transport drives it from a single reader
//! loop, so responses come out in request order.
//!
//! Closing is idempotent and may race with in-flight requests: state changes
//! that touch shared indices are made under the session's state lock, and
//! anything pushed toward the session afterwards resolves as `SessionClosed`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::broker::engine::Broker;
use crate::broker::message::{
    ChannelEvent, ChannelEventAck, ChannelRequest, ChannelResponse, ConnectAck,
    TopicSubscriptionRequest, TopicSubscriptionRequestAck, TopicUnsubscriptionRequest,
    TopicUnsubscriptionRequestAck,
};
use crate::broker::request::{require, require_event};
use crate::broker::status::ResponseStatus;
use crate::broker::topic::SessionId;
use crate::client::Client;
use crate::utils::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerDisconnected,
    ProtocolViolation,
    Explicit,
}

/// Who is on the other end, as resolved by the authentication layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub client_id: String,
    pub device_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Identity {
    pub fn new(client_id: &str, device_id: Option<&str>) -> Self {
        Self {
            client_id: client_id.to_string(),
            device_id: device_id.map(str::to_string),
            attributes: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct ChannelSession {
    broker: Arc<Broker>,
    client: Client,
    state: Mutex<SessionState>,
    identity: OnceLock<Identity>,
}

impl ChannelSession {
    pub fn new(broker: Arc<Broker>, client: Client) -> Self {
        Self {
            broker,
            client,
            state: Mutex::new(SessionState::Unconnected),
            identity: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.client.id
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// Establish the channel: bind the device, make the session reachable
    /// and produce the `ConnectAck`. A failed connect leaves the session
    /// `Unconnected`.
    pub fn connect(&self, identity: Identity) -> ChannelResponse {
        let status: ResponseStatus = self.try_connect(identity).into();
        ChannelResponse::ConnectAck(ConnectAck { status })
    }

    fn try_connect(&self, identity: Identity) -> Result<(), BrokerError> {
        let mut state = self.lock_state();
        match *state {
            SessionState::Unconnected => {}
            SessionState::Connected => {
                return Err(BrokerError::FailedPrecondition(
                    "session already connected".into(),
                ));
            }
            SessionState::Closed => return Err(BrokerError::SessionClosed(self.id().clone())),
        }

        require("client_id", &identity.client_id)?;
        let device_id = match identity.device_id.as_deref() {
            Some(d) if !d.trim().is_empty() => d.to_string(),
            _ if self.broker.settings().enable_device_support => {
                return Err(BrokerError::MalformedRequest("device_id is required".into()));
            }
            // Without device support every session is its own anonymous device
            _ => self.id().clone(),
        };

        self.broker.register_client(self.client.clone());
        self.broker.directory().bind(
            &identity.client_id,
            &device_id,
            self.id(),
            Utc::now(),
            identity.attributes.clone(),
        );
        *state = SessionState::Connected;

        info!(session_id = %self.id(), client_id = %identity.client_id, device_id = %device_id, "session connected");
        let _ = self.identity.set(identity);
        Ok(())
    }

    /// Process one inbound request. Returns the acknowledgment to send back,
    /// or `None` for a peer ack.
    pub async fn handle(&self, request: ChannelRequest) -> Option<ChannelResponse> {
        match request {
            ChannelRequest::ChannelEvent(event) => Some(self.on_channel_event(event).await),
            ChannelRequest::ChannelEventAck(ack) => {
                self.on_ack(ack);
                None
            }
            ChannelRequest::TopicSubscriptionRequest(req) => Some(self.on_subscribe(req)),
            ChannelRequest::TopicUnsubscriptionRequest(req) => Some(self.on_unsubscribe(req)),
        }
    }

    async fn on_channel_event(&self, event: ChannelEvent) -> ChannelResponse {
        let unique_id = event.unique_id.clone();
        let status = match self.publish_inbound(event).await {
            Ok(status) => status,
            Err(e) => {
                debug!(session_id = %self.id(), unique_id = %unique_id, error = %e, "channel event rejected");
                e.into()
            }
        };
        ChannelResponse::ChannelEventAck(ChannelEventAck { unique_id, status })
    }

    /// Dispatch an inbound event. Its `unique_id` counts as in flight only
    /// until the dispatch returns, and the transport handles one frame at a
    /// time, so a repeat arriving on the same connection after the first
    /// finished is dispatched again. `DuplicateRequest` only arises when
    /// `handle` runs concurrently for the same session.
    async fn publish_inbound(&self, event: ChannelEvent) -> Result<ResponseStatus, BrokerError> {
        self.ensure_connected()?;
        require("unique_id", &event.unique_id)?;
        require("topic", &event.topic)?;
        let payload = require_event(event.event.as_ref())?;

        // Held until dispatch finishes; a repeat of this id meanwhile is a duplicate
        let _in_flight = self
            .broker
            .correlator()
            .begin_inbound(self.id(), &event.unique_id)?;

        self.broker.counters().record_received(payload.name());
        let report = self.broker.publish(&event.topic, payload).await;
        Ok(report.status)
    }

    fn on_ack(&self, ack: ChannelEventAck) {
        if let Err(e) = self.ensure_connected() {
            warn!(session_id = %self.id(), unique_id = %ack.unique_id, error = %e, "ignoring ack");
            return;
        }
        // Unknown acks are logged by the correlator; nobody is waiting on them
        let _ = self.broker.handle_ack(self.id(), ack);
    }

    fn on_subscribe(&self, req: TopicSubscriptionRequest) -> ChannelResponse {
        let status = self
            .while_connected(|| {
                require("topic", &req.topic)?;
                if self.broker.registry().subscribe(self.id(), &req.topic) {
                    debug!(session_id = %self.id(), topic = %req.topic, "subscribed");
                }
                Ok(())
            })
            .into();
        ChannelResponse::TopicSubscriptionRequestAck(TopicSubscriptionRequestAck {
            topic: req.topic,
            status,
        })
    }

    fn on_unsubscribe(&self, req: TopicUnsubscriptionRequest) -> ChannelResponse {
        let status = self
            .while_connected(|| {
                require("topic", &req.topic)?;
                if self.broker.registry().unsubscribe(self.id(), &req.topic) {
                    debug!(session_id = %self.id(), topic = %req.topic, "unsubscribed");
                }
                Ok(())
            })
            .into();
        ChannelResponse::TopicUnsubscriptionRequestAck(TopicUnsubscriptionRequestAck {
            topic: req.topic,
            status,
        })
    }

    /// Transition to `Closed` and release everything the session held.
    /// Returns how many pushed-but-unacked events were failed.
    pub fn close(&self, reason: CloseReason) -> usize {
        {
            let mut state = self.lock_state();
            if *state == SessionState::Closed {
                return 0;
            }
            *state = SessionState::Closed;
        }

        self.client.close();
        let failed = self.broker.release_session(self.id());
        info!(session_id = %self.id(), ?reason, failed_pending = failed, "session closed");
        failed
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        self.check(*self.lock_state())
    }

    /// Run `f` while holding the state lock, only if connected. Keeps
    /// registry changes from slipping in after `close` released the session.
    fn while_connected<F>(&self, f: F) -> Result<(), BrokerError>
    where
        F: FnOnce() -> Result<(), BrokerError>,
    {
        let state = self.lock_state();
        self.check(*state)?;
        f()
    }

    fn check(&self, state: SessionState) -> Result<(), BrokerError> {
        match state {
            SessionState::Connected => Ok(()),
            SessionState::Unconnected => Err(BrokerError::NotConnected(self.id().clone())),
            SessionState::Closed => Err(BrokerError::SessionClosed(self.id().clone())),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
