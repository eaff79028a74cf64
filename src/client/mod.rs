//! The `client` module defines the broker-side handle of a connected channel.
//!
//! A `Client` is what the dispatcher pushes into: it wraps the session id,
//! the bounded outbound queue and the close signal of one connection.

pub mod pubsub_client;
pub use pubsub_client::Client;
