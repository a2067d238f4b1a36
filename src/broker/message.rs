//! Message definitions
//!
//! `Message` is the canonical wire/internal representation shared by the
//! broker, the requester and the transports.
//!
//! Notes on fields:
//! - `uri`: topic the message belongs to
//! - `ts`: logical version used for ordering; not wall-clock time
//! - `update_type`: `Full` replaces all state for the uri, `Diff` applies on
//!   top of the preceding chain
//! - `correlation_id`: links a request to its reply, `0` otherwise
//! - `reply_to`: transport topic replies are published to (requests only)
//! - `error`: set on synthesized failure responses

use serde::{Deserialize, Serialize};

use crate::utils::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    #[default]
    Full,
    Diff,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Publish,
    Request,
    Response,
    Current,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub uri: String,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub update_type: UpdateType,
    #[serde(default)]
    pub msg_type: MessageType,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub correlation_id: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    /// Full snapshot of `uri` at version `ts`.
    pub fn full(uri: impl Into<String>, ts: i64, payload: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ts,
            update_type: UpdateType::Full,
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Incremental update of `uri` at version `ts`.
    pub fn diff(uri: impl Into<String>, ts: i64, payload: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ts,
            update_type: UpdateType::Diff,
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Asks whoever serves `uri` to republish its current state.
    pub fn current(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            msg_type: MessageType::Current,
            ..Default::default()
        }
    }

    pub fn is_full(&self) -> bool {
        self.update_type == UpdateType::Full
    }

    /// Transport topic serving this uri: everything before the first `/`.
    pub fn topic(&self) -> &str {
        match self.uri.split_once('/') {
            Some((service, _)) => service,
            None => &self.uri,
        }
    }

    /// Request-shaped copy. Correlation id and reply destination are stamped
    /// by the requester.
    pub fn request(&self) -> Self {
        Self {
            msg_type: MessageType::Request,
            ..self.clone()
        }
    }

    /// Terminal response reporting that the request never reached the wire.
    pub fn response_transport_error(&self, err: impl std::fmt::Display) -> Self {
        Self {
            uri: self.uri.clone(),
            msg_type: MessageType::Response,
            correlation_id: self.correlation_id,
            error: Some(err.to_string()),
            ..Default::default()
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}
