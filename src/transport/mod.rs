//! The `transport` module is responsible for handling network communication
//! with peers via WebSockets.
//!
//! It defines the producer-facing envelopes and implements the WebSocket
//! server itself: the handshake (identity headers, connection limit), one
//! reader loop and one writer task per channel session, and the request loop
//! for producer connections.

pub mod message;
pub mod websocket;

#[cfg(test)]
mod tests;

#[cfg(test)]
mod websocket_tests;
