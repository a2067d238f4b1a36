//! Broker engine
//!
//! The broker owns the topic → `Spreader` map and mutates it from exactly one
//! task. Every public call packages its work as a job and queues it on an
//! unbounded channel; the worker runs jobs one at a time in queue order, so no
//! per-topic locking is needed.
//!
//! Usage notes:
//! - `Broker` is a cheap, cloneable handle. The worker stops once every handle
//!   is dropped.
//! - `publish`, `subscribe`, `unsubscribe` and `remove_expired` return once the
//!   job is queued. `flush` resolves after everything queued before it ran.
//! - Delivery to subscribers happens inside the job, so subscriber capabilities
//!   must not block.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::message::Message;
use crate::broker::spreader::Spreader;
use crate::client::{Subscriber, SubscriberId};
use crate::transport::{Transport, TransportSubscription};
use crate::utils::{Error, Result};

type Job = Box<dyn FnOnce(&mut State) + Send>;

/// State owned by the worker task.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) spreaders: HashMap<String, Spreader>,
    /// Topics each subscriber is currently on.
    pub(crate) subscriptions: HashMap<SubscriberId, HashSet<String>>,
}

impl State {
    fn spreader(&mut self, uri: &str) -> &mut Spreader {
        self.spreaders
            .entry(uri.to_string())
            .or_insert_with(|| Spreader::new(uri))
    }

    fn publish(&mut self, msg: Message) {
        let uri = msg.uri.clone();
        self.spreader(&uri).publish(msg);
    }

    fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>, topics: HashMap<String, i64>) {
        let id = subscriber.id().to_string();
        let previous = self.subscriptions.remove(&id).unwrap_or_default();

        for uri in previous.iter().filter(|uri| !topics.contains_key(*uri)) {
            if let Some(spreader) = self.spreaders.get_mut(uri) {
                spreader.unsubscribe(&id);
            }
        }

        for (uri, offset) in &topics {
            self.spreader(uri).subscribe(subscriber.clone(), *offset);
        }

        if !topics.is_empty() {
            self.subscriptions.insert(id, topics.into_keys().collect());
        }
    }

    fn unsubscribe(&mut self, id: &str) {
        let Some(topics) = self.subscriptions.remove(id) else {
            return;
        };
        for uri in topics {
            if let Some(spreader) = self.spreaders.get_mut(&uri) {
                spreader.unsubscribe(id);
            }
        }
        debug!(subscriber = %id, "unsubscribed");
    }

    fn remove_expired(&mut self, threshold: Duration) -> usize {
        let now = Instant::now();
        let before = self.spreaders.len();
        self.spreaders
            .retain(|_, spreader| !spreader.is_expired(now, threshold));
        before - self.spreaders.len()
    }

    fn replay(&self, uri: &str) -> Vec<Message> {
        if !uri.is_empty() {
            return self
                .spreaders
                .get(uri)
                .map(Spreader::replay)
                .unwrap_or_default();
        }
        let ordered: BTreeMap<_, _> = self.spreaders.iter().collect();
        ordered.values().flat_map(|s| s.replay()).collect()
    }
}

#[derive(Clone, Debug)]
pub struct Broker {
    jobs: mpsc::UnboundedSender<Job>,
}

impl Broker {
    /// Spawns the worker on the current tokio runtime and returns its handle.
    pub fn new() -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            let mut state = State::default();
            while let Some(job) = rx.recv().await {
                job(&mut state);
            }
            debug!("broker worker stopped");
        });
        Self { jobs }
    }

    fn submit(&self, job: impl FnOnce(&mut State) + Send + 'static) -> Result<()> {
        self.jobs.send(Box::new(job)).map_err(|_| Error::BrokerClosed)
    }

    /// Runs `f` on the worker and waits for its result.
    pub(crate) async fn query<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut State) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move |state| {
            let _ = tx.send(f(state));
        })?;
        rx.await.map_err(|_| Error::BrokerClosed)
    }

    pub fn publish(&self, msg: Message) -> Result<()> {
        self.submit(move |state| state.publish(msg))
    }

    /// Subscribes to every topic in `topics`, starting each one from the given
    /// last known `ts`. Topics the subscriber was on but that are missing from
    /// `topics` are dropped.
    pub fn subscribe(
        &self,
        subscriber: Arc<dyn Subscriber>,
        topics: HashMap<String, i64>,
    ) -> Result<()> {
        self.submit(move |state| state.subscribe(subscriber, topics))
    }

    pub fn unsubscribe(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.submit(move |state| state.unsubscribe(&id))
    }

    /// Drops every topic without subscribers that has been idle for at least
    /// `threshold`.
    pub fn remove_expired(&self, threshold: Duration) -> Result<()> {
        self.submit(move |state| {
            let removed = state.remove_expired(threshold);
            if removed > 0 {
                info!(removed, remaining = state.spreaders.len(), "reaped idle topics");
            }
        })
    }

    /// Retained history of `uri`, or of every topic when `uri` is empty.
    pub async fn replay(&self, uri: &str) -> Result<Vec<Message>> {
        let uri = uri.to_string();
        self.query(move |state| state.replay(&uri)).await
    }

    /// Resolves once every job queued before this call has run.
    pub async fn flush(&self) -> Result<()> {
        self.query(|_| ()).await
    }

    /// Names of the topics currently held, sorted.
    pub async fn topics(&self) -> Result<Vec<String>> {
        self.query(|state| {
            let mut topics: Vec<_> = state.spreaders.keys().cloned().collect();
            topics.sort();
            topics
        })
        .await
    }

    /// Periodically reclaims idle topics until `shutdown` fires.
    pub fn spawn_reaper(
        &self,
        interval: Duration,
        idle: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if broker.remove_expired(idle).is_err() {
                            warn!("broker closed, reaper exiting");
                            break;
                        }
                    }
                }
            }
            debug!("reaper stopped");
        })
    }

    /// Feeds every message arriving on transport `topic` into `publish`.
    pub fn listen(
        &self,
        transport: &dyn Transport,
        topic: &str,
    ) -> Result<Box<dyn TransportSubscription>> {
        let broker = self.clone();
        let source = topic.to_string();
        let subscription = transport.subscribe(
            topic,
            Arc::new(move |body: Vec<u8>| match Message::from_bytes(&body) {
                Ok(msg) => {
                    if broker.publish(msg).is_err() {
                        warn!(topic = %source, "broker closed, inbound message dropped");
                    }
                }
                Err(e) => warn!(topic = %source, error = %e, "undecodable message dropped"),
            }),
        )?;
        info!(topic, "broker listening");
        Ok(subscription)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
