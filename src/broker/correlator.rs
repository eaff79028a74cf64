//! Ack correlation
//!
//! Two ledgers, both keyed by session:
//! - outbound: events the broker pushed toward a session and is waiting on.
//!   Each entry is resolved exactly once, either by the peer's
//!   `ChannelEventAck` or by session closure, and the resolution is handed to
//!   whoever holds the matching `Delivery`.
//! - inbound: `unique_id`s of events a session sent that are still being
//!   dispatched. A second event with the same id while the first is in
//!   flight is rejected as a duplicate.
//!
//! Resolution always goes through `remove` on the ledger, so an ack racing
//! with closure can never resolve the same entry twice. There is no retry or
//! timeout here; producers decide what to do with a failure status.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::broker::status::ResponseStatus;
use crate::broker::topic::SessionId;
use crate::utils::BrokerError;

#[derive(Debug)]
pub struct PendingAck {
    pub topic: String,
    pub event_name: String,
    pub sent_at: Instant,
    resolver: oneshot::Sender<ResponseStatus>,
}

/// Receiving side of one pending entry.
#[derive(Debug)]
pub struct Delivery {
    pub session: SessionId,
    pub unique_id: String,
    rx: oneshot::Receiver<ResponseStatus>,
}

impl Delivery {
    /// Wait for the entry to be resolved.
    pub async fn resolved(self) -> ResponseStatus {
        let session = self.session;
        self.rx
            .await
            .unwrap_or_else(|_| BrokerError::SessionClosed(session).into())
    }

    /// The resolution, if it already happened.
    pub fn try_resolved(&mut self) -> Option<ResponseStatus> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Default)]
pub struct AckCorrelator {
    outbound: DashMap<SessionId, HashMap<String, PendingAck>>,
    inbound: DashMap<SessionId, HashSet<String>>,
}

impl AckCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending entry for an event about to be pushed.
    pub fn register(
        &self,
        session: &SessionId,
        unique_id: &str,
        topic: &str,
        event_name: &str,
    ) -> Result<Delivery, BrokerError> {
        let mut pending = self.outbound.entry(session.clone()).or_default();
        if pending.contains_key(unique_id) {
            return Err(BrokerError::DuplicateRequest(unique_id.to_string()));
        }

        let (resolver, rx) = oneshot::channel();
        pending.insert(
            unique_id.to_string(),
            PendingAck {
                topic: topic.to_string(),
                event_name: event_name.to_string(),
                sent_at: Instant::now(),
                resolver,
            },
        );

        Ok(Delivery {
            session: session.clone(),
            unique_id: unique_id.to_string(),
            rx,
        })
    }

    /// Resolve an entry with the status carried by the peer's ack.
    pub fn acknowledge(
        &self,
        session: &SessionId,
        unique_id: &str,
        status: ResponseStatus,
    ) -> Result<(), BrokerError> {
        match self.take(session, unique_id) {
            Some(pending) => {
                debug!(
                    session_id = %session,
                    unique_id,
                    topic = %pending.topic,
                    event = %pending.event_name,
                    elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
                    success = status.success,
                    "ack received"
                );
                let _ = pending.resolver.send(status);
                Ok(())
            }
            None => {
                warn!(session_id = %session, unique_id, "dropping ack for unknown unique_id");
                Err(BrokerError::UnknownAck(unique_id.to_string()))
            }
        }
    }

    /// Resolve an entry on the broker's own behalf (failed enqueue, closure
    /// detected during a push). Returns false if it was already resolved.
    pub fn resolve(&self, session: &SessionId, unique_id: &str, status: ResponseStatus) -> bool {
        match self.take(session, unique_id) {
            Some(pending) => {
                let _ = pending.resolver.send(status);
                true
            }
            None => false,
        }
    }

    /// Resolve every outstanding entry of a closing session with
    /// `SessionClosed` and forget its inbound ids. Returns how many pushed
    /// events were failed.
    pub fn close_session(&self, session: &SessionId) -> usize {
        self.inbound.remove(session);

        let Some((_, pending)) = self.outbound.remove(session) else {
            return 0;
        };

        let count = pending.len();
        let status: ResponseStatus = BrokerError::SessionClosed(session.clone()).into();
        for (unique_id, entry) in pending {
            debug!(session_id = %session, unique_id = %unique_id, "resolving pending event as session closed");
            let _ = entry.resolver.send(status.clone());
        }
        count
    }

    pub fn pending_count(&self, session: &SessionId) -> usize {
        self.outbound
            .get(session)
            .map(|pending| pending.len())
            .unwrap_or(0)
    }

    pub fn is_pending(&self, session: &SessionId, unique_id: &str) -> bool {
        self.outbound
            .get(session)
            .is_some_and(|pending| pending.contains_key(unique_id))
    }

    /// Mark an inbound `unique_id` as in flight. The returned guard releases
    /// it when dropped.
    pub fn begin_inbound<'a>(
        &'a self,
        session: &SessionId,
        unique_id: &str,
    ) -> Result<InboundGuard<'a>, BrokerError> {
        let fresh = self
            .inbound
            .entry(session.clone())
            .or_default()
            .insert(unique_id.to_string());

        if !fresh {
            return Err(BrokerError::DuplicateRequest(unique_id.to_string()));
        }

        Ok(InboundGuard {
            correlator: self,
            session: session.clone(),
            unique_id: unique_id.to_string(),
        })
    }

    fn take(&self, session: &SessionId, unique_id: &str) -> Option<PendingAck> {
        let taken = self
            .outbound
            .get_mut(session)
            .and_then(|mut pending| pending.remove(unique_id));
        self.outbound
            .remove_if(session, |_, pending| pending.is_empty());
        taken
    }

    fn end_inbound(&self, session: &SessionId, unique_id: &str) {
        if let Some(mut ids) = self.inbound.get_mut(session) {
            ids.remove(unique_id);
        }
        self.inbound.remove_if(session, |_, ids| ids.is_empty());
    }
}

/// Holds an inbound `unique_id` in flight until dropped.
#[derive(Debug)]
pub struct InboundGuard<'a> {
    correlator: &'a AckCorrelator,
    session: SessionId,
    unique_id: String,
}

impl Drop for InboundGuard<'_> {
    fn drop(&mut self) {
        self.correlator.end_inbound(&self.session, &self.unique_id);
    }
}
