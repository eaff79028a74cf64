//! Broker engine
//!
//! `Broker` owns the shared state every session touches (live clients, the
//! subscription registry, the device directory and the ack correlator) and
//! implements the dispatcher: it resolves an addressing mode into a set of
//! sessions and pushes the event through each session's outbound queue.
//!
//! Concurrency and usage notes:
//! - `Broker` is shared as `Arc<Broker>`; every index is a `DashMap`, so a
//!   broadcast to one topic does not block a subscribe on another.
//! - A push registers its pending ack entry before it is enqueued and
//!   returns as soon as the queue accepted it. Delivery outcome arrives
//!   later through the `Delivery` handles in the `DispatchReport`.
//! - Fan-out targets are a snapshot taken at dispatch time.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::correlator::{AckCorrelator, Delivery};
use crate::broker::directory::DeviceDirectory;
use crate::broker::message::{ChannelEvent, ChannelEventAck, ChannelResponse, Event};
use crate::broker::metrics::{Metrics, MetricsSnapshot};
use crate::broker::request::{
    GetClientActiveDevicesRequest, GetClientActiveDevicesResponse, SendEventToClientChannelRequest,
    SendEventToClientChannelResponse, SendEventToClientDeviceChannelRequest,
    SendEventToClientDeviceChannelResponse, SendEventToTopicRequest, SendEventToTopicResponse,
    SendEventToTopicsRequest, SendEventToTopicsResponse, require, require_event,
};
use crate::broker::status::ResponseStatus;
use crate::broker::topic::{SessionId, SubscriptionRegistry};
use crate::client::Client;
use crate::config::BrokerSettings;
use crate::utils::BrokerError;

/// Result of pushing one event toward one session.
#[derive(Debug)]
pub struct PushOutcome {
    /// Whether the event made it into the session's outbound queue.
    pub status: ResponseStatus,
    /// Eventual ack resolution; `None` when no pending entry was registered.
    pub delivery: Option<Delivery>,
}

/// Result of a fan-out.
#[derive(Debug)]
pub struct DispatchReport {
    /// Worst enqueue outcome across destinations. Succeeds for zero
    /// destinations.
    pub status: ResponseStatus,
    pub deliveries: Vec<Delivery>,
}

/// A connected session as the dispatcher sees it.
#[derive(Debug)]
struct LiveSession {
    client: Client,
    connected_at: Instant,
}

#[derive(Debug)]
pub struct Broker {
    clients: DashMap<SessionId, LiveSession>,
    registry: SubscriptionRegistry,
    directory: DeviceDirectory,
    correlator: AckCorrelator,
    metrics: Metrics,
    settings: BrokerSettings,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            clients: DashMap::new(),
            registry: SubscriptionRegistry::new(),
            directory: DeviceDirectory::new(),
            correlator: AckCorrelator::new(),
            metrics: Metrics::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    pub fn correlator(&self) -> &AckCorrelator {
        &self.correlator
    }

    pub(crate) fn counters(&self) -> &Metrics {
        &self.metrics
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of live (connected, not yet released) sessions.
    pub fn session_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_live(&self, session: &SessionId) -> bool {
        self.clients.contains_key(session)
    }

    /// Create a client handle sized and configured for this broker.
    pub fn new_client(&self) -> (Client, Receiver<ChannelResponse>) {
        Client::new(
            self.settings.outbound_queue_capacity,
            self.settings.overflow_policy,
        )
    }

    /// Make a connected session reachable by the dispatcher.
    pub fn register_client(&self, client: Client) {
        let live = LiveSession {
            client,
            connected_at: Instant::now(),
        };
        if self.clients.insert(live.client.id.clone(), live).is_none() {
            Metrics::incr(&self.metrics.connected_sessions);
        }
    }

    /// Remove every trace of a session: its client handle, topic
    /// memberships, device binding and pending acks (failed with
    /// `SessionClosed`). Idempotent. Returns how many pending pushes were
    /// failed.
    pub fn release_session(&self, session: &SessionId) -> usize {
        let Some((_, live)) = self.clients.remove(session) else {
            return 0;
        };
        // Cancel before sweeping so a push racing with us either lands in the
        // sweep or sees the session closed and resolves its own entry.
        live.client.close();

        let topics = self.registry.remove_session(session);
        let device = self.directory.unbind(session);
        let failed = self.correlator.close_session(session);

        Metrics::decr(&self.metrics.connected_sessions);
        self.metrics.observe_session(live.connected_at.elapsed());
        self.metrics
            .events_failed
            .fetch_add(failed as u64, Ordering::Relaxed);

        info!(
            session_id = %session,
            topics = topics.len(),
            device = ?device,
            failed_pending = failed,
            "released session"
        );
        failed
    }

    /// Push one event toward one session.
    pub async fn push(&self, session: &SessionId, topic: &str, event: &Arc<Event>) -> PushOutcome {
        let Some(client) = self.clients.get(session).map(|live| live.client.clone()) else {
            Metrics::incr(&self.metrics.events_failed);
            return PushOutcome {
                status: BrokerError::SessionClosed(session.clone()).into(),
                delivery: None,
            };
        };

        let unique_id = Uuid::new_v4().to_string();
        let delivery = match self
            .correlator
            .register(session, &unique_id, topic, event.name())
        {
            Ok(delivery) => delivery,
            Err(e) => {
                Metrics::incr(&self.metrics.events_failed);
                return PushOutcome {
                    status: e.into(),
                    delivery: None,
                };
            }
        };

        if client.is_closed() {
            let status: ResponseStatus = BrokerError::SessionClosed(session.clone()).into();
            if self.correlator.resolve(session, &unique_id, status.clone()) {
                Metrics::incr(&self.metrics.events_failed);
            }
            return PushOutcome {
                status,
                delivery: Some(delivery),
            };
        }

        let msg = ChannelResponse::ChannelEvent(ChannelEvent {
            unique_id: unique_id.clone(),
            topic: topic.to_string(),
            event: Some(Arc::clone(event)),
        });

        match client.push(msg).await {
            Ok(()) => {
                self.metrics.record_sent(event.name());
                debug!(session_id = %session, topic, unique_id = %unique_id, event = event.name(), "pushed event");
                PushOutcome {
                    status: ResponseStatus::ok(),
                    delivery: Some(delivery),
                }
            }
            Err(err) => {
                warn!(session_id = %session, topic, unique_id = %unique_id, error = %err, "push failed");
                let status: ResponseStatus = err.into();
                if self.correlator.resolve(session, &unique_id, status.clone()) {
                    Metrics::incr(&self.metrics.events_failed);
                }
                PushOutcome {
                    status,
                    delivery: Some(delivery),
                }
            }
        }
    }

    /// Push `event` to every target concurrently and aggregate the outcome.
    pub async fn dispatch(
        &self,
        targets: &[SessionId],
        topic: &str,
        event: Arc<Event>,
    ) -> DispatchReport {
        let outcomes = join_all(targets.iter().map(|s| self.push(s, topic, &event))).await;

        let status = ResponseStatus::worst_of(outcomes.iter().map(|o| &o.status));
        let deliveries = outcomes.into_iter().filter_map(|o| o.delivery).collect();

        DispatchReport { status, deliveries }
    }

    /// Topic broadcast to a snapshot of the current subscribers.
    pub async fn publish(&self, topic: &str, event: Arc<Event>) -> DispatchReport {
        let targets = self.registry.subscribers_of(topic);
        debug!(topic, subscribers = targets.len(), event = event.name(), "publishing to topic");
        self.dispatch(&targets, topic, event).await
    }

    pub async fn send_event_to_topic(&self, req: SendEventToTopicRequest) -> SendEventToTopicResponse {
        let status = match self.topic_entry(&req).await {
            Ok(report) => report.status,
            Err(e) => e.into(),
        };
        SendEventToTopicResponse { status }
    }

    /// Batched topic broadcast. Each entry is dispatched on its own; a bad or
    /// failing entry does not stop the rest. The aggregate reports the worst
    /// entry and names failing entries as `requests[i]`.
    pub async fn send_event_to_topics(
        &self,
        req: SendEventToTopicsRequest,
    ) -> SendEventToTopicsResponse {
        let mut entry_statuses = Vec::with_capacity(req.requests.len());
        for entry in &req.requests {
            let status = match self.topic_entry(entry).await {
                Ok(report) => report.status,
                Err(e) => e.into(),
            };
            entry_statuses.push(status);
        }

        let mut status = ResponseStatus::worst_of(&entry_statuses);
        for (idx, entry_status) in entry_statuses.iter().enumerate() {
            if !entry_status.success {
                status = status.with_detail(
                    &format!("requests[{idx}]"),
                    entry_status.error_code.clone(),
                );
            }
        }
        SendEventToTopicsResponse { status }
    }

    async fn topic_entry(&self, req: &SendEventToTopicRequest) -> Result<DispatchReport, BrokerError> {
        require("topic", &req.topic)?;
        let event = require_event(req.event.as_ref())?;
        Ok(self.publish(&req.topic, event).await)
    }

    /// Client broadcast: every online device of the client. Succeeds
    /// trivially when the client has none.
    pub async fn send_event_to_client_channel(
        &self,
        req: SendEventToClientChannelRequest,
    ) -> SendEventToClientChannelResponse {
        let status = match self.client_broadcast(&req).await {
            Ok(report) => report.status,
            Err(e) => e.into(),
        };
        SendEventToClientChannelResponse { status }
    }

    /// Same as `send_event_to_client_channel` but keeps the per-device
    /// deliveries.
    pub async fn client_broadcast(
        &self,
        req: &SendEventToClientChannelRequest,
    ) -> Result<DispatchReport, BrokerError> {
        require("client_id", &req.client_id)?;
        let event = require_event(req.event.as_ref())?;
        let targets = self.directory.sessions_of(&req.client_id);
        debug!(client_id = %req.client_id, devices = targets.len(), "publishing to client");
        Ok(self.dispatch(&targets, &req.client_id, event).await)
    }

    /// Direct device addressing. Unlike the broadcasts, a missing recipient
    /// is a failure.
    pub async fn send_event_to_client_device_channel(
        &self,
        req: SendEventToClientDeviceChannelRequest,
    ) -> SendEventToClientDeviceChannelResponse {
        let status = match self.device_push(&req).await {
            Ok(outcome) => outcome.status,
            Err(e) => e.into(),
        };
        SendEventToClientDeviceChannelResponse { status }
    }

    pub async fn device_push(
        &self,
        req: &SendEventToClientDeviceChannelRequest,
    ) -> Result<PushOutcome, BrokerError> {
        self.require_device_support()?;
        require("client_id", &req.client_id)?;
        require("device_id", &req.device_id)?;
        let event = require_event(req.event.as_ref())?;

        let session = self
            .directory
            .session_of(&req.client_id, &req.device_id)
            .ok_or_else(|| BrokerError::DeviceNotFound {
                client_id: req.client_id.clone(),
                device_id: req.device_id.clone(),
            })?;

        let topic = format!("{}--{}", req.client_id, req.device_id);
        Ok(self.push(&session, &topic, &event).await)
    }

    pub fn get_client_active_devices(
        &self,
        req: &GetClientActiveDevicesRequest,
    ) -> GetClientActiveDevicesResponse {
        let checked = self
            .require_device_support()
            .and_then(|_| require("client_id", &req.client_id));
        if let Err(e) = checked {
            return GetClientActiveDevicesResponse {
                status: e.into(),
                is_client_online: false,
                devices: Vec::new(),
            };
        }

        let devices = self.directory.active_devices(&req.client_id);
        GetClientActiveDevicesResponse {
            status: ResponseStatus::ok(),
            is_client_online: !devices.is_empty(),
            devices,
        }
    }

    /// Resolve a pending push with the peer's ack.
    pub fn handle_ack(&self, session: &SessionId, ack: ChannelEventAck) -> Result<(), BrokerError> {
        let success = ack.status.success;
        match self.correlator.acknowledge(session, &ack.unique_id, ack.status) {
            Ok(()) => {
                Metrics::incr(&self.metrics.events_acked);
                if !success {
                    Metrics::incr(&self.metrics.events_failed);
                }
                Ok(())
            }
            Err(e) => {
                Metrics::incr(&self.metrics.unknown_acks);
                Err(e)
            }
        }
    }

    fn require_device_support(&self) -> Result<(), BrokerError> {
        if !self.settings.enable_device_support {
            return Err(BrokerError::FailedPrecondition(
                "device support disabled".into(),
            ));
        }
        Ok(())
    }
}
