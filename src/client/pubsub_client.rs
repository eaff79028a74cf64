//! Client representation
//!
//! `Client` is the broker-side handle of one connected channel: its session
//! id, the sending half of its bounded outbound queue, and a cancellation
//! token that fires when the session closes. The transport owns the
//! receiving half and drains it to the socket.

use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::message::ChannelResponse;
use crate::broker::topic::SessionId;
use crate::config::OverflowPolicy;
use crate::utils::BrokerError;

#[derive(Debug, Clone)]
pub struct Client {
    pub id: SessionId,
    sender: Sender<ChannelResponse>,
    closed: CancellationToken,
    policy: OverflowPolicy,
}

impl Client {
    /// Create a client with a fresh session id and an outbound queue of
    /// `capacity` messages.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> (Self, Receiver<ChannelResponse>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let client = Self {
            id: format!("session-{}", Uuid::new_v4()),
            sender,
            closed: CancellationToken::new(),
            policy,
        };
        (client, receiver)
    }

    /// Queue a broker-initiated push, honoring the overflow policy.
    pub async fn push(&self, msg: ChannelResponse) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::SessionClosed(self.id.clone()));
        }
        match self.policy {
            OverflowPolicy::Shed => match self.sender.try_send(msg) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(BrokerError::QueueFull(self.id.clone())),
                Err(TrySendError::Closed(_)) => Err(BrokerError::SessionClosed(self.id.clone())),
            },
            OverflowPolicy::Block => self.send_until_closed(msg).await,
        }
    }

    /// Queue a response to one of this session's own requests. Always waits
    /// for room, but gives up once the session closes.
    pub async fn reply(&self, msg: ChannelResponse) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::SessionClosed(self.id.clone()));
        }
        self.send_until_closed(msg).await
    }

    async fn send_until_closed(&self, msg: ChannelResponse) -> Result<(), BrokerError> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(BrokerError::SessionClosed(self.id.clone())),
            sent = self.sender.send(msg) => {
                sent.map_err(|_| BrokerError::SessionClosed(self.id.clone()))
            }
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }

    /// Resolves once the session has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}
