//! In-process transport
//!
//! Every subscription owns an unbounded queue drained by its own task, so a
//! handler never runs on the publisher's task and bodies reach a subscription
//! in publish order. Publishing to a topic nobody listens on succeeds and
//! drops the body.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Handler, Transport, TransportSubscription};
use crate::utils::TransportError;

type Routes = HashMap<String, HashMap<u64, mpsc::UnboundedSender<Vec<u8>>>>;

#[derive(Default)]
struct Hub {
    routes: Mutex<Routes>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscribers(&self, topic: &str) -> usize {
        let routes = self.hub.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.get(topic).map_or(0, HashMap::len)
    }

    pub fn is_closed(&self) -> bool {
        self.hub.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let routes = self.hub.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes.get(topic) {
            Some(subs) => {
                for tx in subs.values() {
                    let _ = tx.send(body.clone());
                }
                trace!(topic, receivers = subs.len(), "published");
            }
            None => trace!(topic, "published to topic without subscribers"),
        }
        Ok(())
    }

    fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
    ) -> Result<Box<dyn TransportSubscription>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.hub
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .insert(id, tx);

        tokio::spawn(async move {
            while let Some(body) = rx.recv().await {
                handler(body);
            }
        });
        debug!(topic, id, "subscription opened");

        Ok(Box::new(MemorySubscription {
            hub: Arc::downgrade(&self.hub),
            topic: topic.to_string(),
            id,
        }))
    }

    fn close(&self) {
        self.hub.closed.store(true, Ordering::SeqCst);
    }
}

struct MemorySubscription {
    hub: Weak<Hub>,
    topic: String,
    id: u64,
}

impl TransportSubscription for MemorySubscription {
    fn close(&self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let mut routes = hub.routes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = routes.get_mut(&self.topic) {
            // dropping the sender ends the drain task
            subs.remove(&self.id);
            if subs.is_empty() {
                routes.remove(&self.topic);
            }
        }
        debug!(topic = %self.topic, id = self.id, "subscription closed");
    }
}
