//! # Pushline
//!
//! `pushline` is an in-memory event-channel broker. Peers hold long-lived
//! WebSocket channels, subscribe to topics and exchange acknowledged events;
//! backend producers push events to a topic, to every device of a client or
//! to one device, and query which devices are online.
//!
//! ## Core Modules
//!
//! - `broker`: channel sessions, the subscription registry, the device
//!   directory, ack correlation and the dispatcher.
//! - `client`: the broker-side handle of one connected channel.
//! - `config`: loading and merging server configuration.
//! - `transport`: the WebSocket server and its wire envelopes.
//! - `utils`: error kinds and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
