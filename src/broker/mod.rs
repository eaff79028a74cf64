//! Broker core: sessions, subscriptions, device bindings, ack correlation
//! and the dispatcher that ties them together.

pub mod correlator;
pub mod directory;
pub mod engine;
pub mod message;
pub mod metrics;
pub mod request;
pub mod session;
pub mod status;
pub mod topic;

pub use engine::{Broker, DispatchReport, PushOutcome};
pub use session::{ChannelSession, CloseReason, Identity, SessionState};
