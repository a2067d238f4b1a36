//! The broker: topic routing, catch-up replay and idle-topic reclamation.
//!
//! - `message`: the `Message` model shared by every layer.
//! - `spreader`: one topic's retained history and subscriber roster.
//! - `engine`: the `Broker` handle and its single worker task.

pub mod engine;
pub mod message;
pub mod spreader;

pub use engine::Broker;
pub use message::{Message, MessageType, UpdateType};
pub use spreader::Spreader;
