//! The `client` module defines how the broker and requester reach a subscriber.
//!
//! `Subscriber` is the capability: an identity plus send-one / send-batch.
//! `Client` is the channel-backed implementation used for WebSocket
//! connections and tests.

pub mod pubsub_client;
pub use pubsub_client::{Client, Subscriber, SubscriberId};

#[cfg(test)]
mod tests;
