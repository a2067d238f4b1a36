//! The `transport` module covers everything that moves bytes.
//!
//! - `Transport` is the capability the broker and requester need from a
//!   message bus: publish bytes to a topic, and run a handler for every body
//!   arriving on a topic.
//! - `memory` is an in-process implementation of that capability.
//! - `websocket` exposes the broker and requester to remote clients.

pub mod memory;
pub mod message;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;

use crate::utils::TransportError;

pub use memory::MemoryTransport;

/// Callback invoked once per inbound body, on the transport's own task.
pub type Handler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), TransportError>;

    fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
    ) -> Result<Box<dyn TransportSubscription>, TransportError>;

    /// Closes the producing side. Later publishes fail.
    fn close(&self);
}

/// Handle of an active transport subscription.
pub trait TransportSubscription: Send + Sync {
    fn close(&self);
}
