use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::broker::message::Message;

pub type SubscriberId = String;

/// Delivery capability the broker and requester need from a subscriber.
///
/// Implementations are called from inside the broker worker, so `send` and
/// `send_msgs` must hand the messages off without blocking.
pub trait Subscriber: Send + Sync {
    /// Identity used to key roster entries and pending requests.
    fn id(&self) -> &str;

    fn send(&self, msg: Message);

    /// Delivers a catch-up batch. Ordering within the batch must be kept.
    fn send_msgs(&self, msgs: Vec<Message>) {
        for msg in msgs {
            self.send(msg);
        }
    }
}

/// A subscriber backed by an unbounded channel, one per connection.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier for the client (`client-<uuid>`).
    pub id: SubscriberId,

    /// Channel the connection's writer drains.
    pub sender: UnboundedSender<Message>,
}

impl Client {
    pub fn new(sender: UnboundedSender<Message>) -> Self {
        Self::with_id(format!("client-{}", uuid::Uuid::new_v4()), sender)
    }

    pub fn with_id(id: impl Into<SubscriberId>, sender: UnboundedSender<Message>) -> Self {
        Self {
            id: id.into(),
            sender,
        }
    }

    pub fn shared(self) -> Arc<dyn Subscriber> {
        Arc::new(self)
    }
}

impl Subscriber for Client {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, msg: Message) {
        if self.sender.send(msg).is_err() {
            debug!(client = %self.id, "receiver dropped, message discarded");
        }
    }
}
