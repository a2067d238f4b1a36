//! # spreadbus
//!
//! `spreadbus` is an in-memory, topic-partitioned publish/subscribe broker
//! with catch-up replay, plus a request/reply layer over the same transport.
//!
//! Producers publish `Full` snapshots and `Diff` increments, each carrying a
//! logical version `ts`. A subscriber joining mid-stream states the last `ts`
//! it knows per topic and receives exactly what it needs to become
//! consistent: the missing diffs, or the latest full snapshot plus everything
//! after it.
//!
//! ## Core Modules
//!
//! - `broker`: per-topic history (`Spreader`), the single-worker `Broker`, and
//!   idle-topic reclamation.
//! - `requester`: correlation of requests and replies over a transport.
//! - `client`: the `Subscriber` capability and its channel-backed `Client`.
//! - `transport`: the `Transport` capability, an in-process implementation and
//!   the WebSocket front end.
//! - `config`: settings loaded from file and environment.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod requester;
pub mod transport;
pub mod utils;

pub use broker::{Broker, Message, MessageType, UpdateType};
pub use client::{Client, Subscriber};
pub use requester::Requester;
pub use transport::{MemoryTransport, Transport};
pub use utils::{Error, Result};
