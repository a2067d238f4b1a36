use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::broker::message::{Message, UpdateType};

/// Frames a WebSocket client may send.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Replaces the connection's subscriptions; values are last known `ts`.
    Subscribe { topics: HashMap<String, i64> },

    Unsubscribe,

    /// `ts` defaults to the current wall-clock time in milliseconds.
    Publish {
        uri: String,
        #[serde(default)]
        ts: Option<i64>,
        #[serde(default)]
        update_type: UpdateType,
        #[serde(default)]
        payload: String,
    },

    Request {
        uri: String,
        #[serde(default)]
        payload: String,
        #[serde(default)]
        correlation_id: u64,
    },

    Current { uri: String },

    /// Empty `uri` dumps every topic.
    Replay {
        #[serde(default)]
        uri: String,
    },
}

/// Frames the server sends besides plain `Message`s.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Replay { messages: Vec<Message> },
    Error { message: String },
}
