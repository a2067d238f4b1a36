use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::message::Message;
use crate::client::Subscriber;
use crate::config::RequesterSettings;
use crate::transport::{Transport, TransportSubscription};
use crate::utils::Result;

/// Correlation id assigned by a requester. Starts at 1 and never repeats.
pub type CorrelationId = u64;

struct PendingCall {
    origin: Arc<dyn Subscriber>,
    msg: Message,
}

#[derive(Default)]
struct Pending {
    last_id: CorrelationId,
    calls: HashMap<CorrelationId, PendingCall>,
}

struct Inner {
    reply_topic: String,
    transport: Arc<dyn Transport>,
    pending: Mutex<Pending>,
    consumer: Mutex<Option<Box<dyn TransportSubscription>>>,
    closed: CancellationToken,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_reply(&self, body: &[u8]) {
        match Message::from_bytes(body) {
            Ok(msg) => self.reply(msg.correlation_id, msg),
            Err(e) => warn!(topic = %self.reply_topic, error = %e, "undecodable reply dropped"),
        }
    }

    /// Routes `msg` to whoever is waiting on `id`. Only the first reply for an
    /// id is delivered.
    fn reply(&self, id: CorrelationId, mut msg: Message) {
        let call = self.pending().calls.remove(&id);
        let Some(call) = call else {
            debug!(correlation_id = id, "reply without pending request dropped");
            return;
        };
        msg.correlation_id = call.msg.correlation_id;
        call.origin.send(msg);
    }

    fn shutdown(&self) {
        self.transport.close();
        if let Some(consumer) = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            consumer.close();
        }
        let dropped = {
            let mut pending = self.pending();
            let n = pending.calls.len();
            pending.calls.clear();
            n
        };
        self.closed.cancel();
        info!(topic = %self.reply_topic, dropped, "requester closed");
    }
}

/// Request/reply over a fire-and-forget transport.
///
/// Each `send` is published with a fresh correlation id and this instance's
/// reply topic; the reply coming back on that topic is handed to the original
/// caller with the caller's own correlation id restored.
#[derive(Clone)]
pub struct Requester {
    inner: Arc<Inner>,
}

impl Requester {
    /// Opens the reply subscription and starts watching `shutdown`.
    ///
    /// Fails when the transport refuses the reply subscription.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: &RequesterSettings,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            reply_topic: reply_topic_name(settings),
            transport,
            pending: Mutex::new(Pending::default()),
            consumer: Mutex::new(None),
            closed: CancellationToken::new(),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let consumer = inner.transport.subscribe(
            &inner.reply_topic,
            Arc::new(move |body: Vec<u8>| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_reply(&body);
                }
            }),
        )?;
        *inner.consumer.lock().unwrap_or_else(|e| e.into_inner()) = Some(consumer);

        let waiter = inner.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            waiter.shutdown();
        });

        info!(topic = %inner.reply_topic, "requester ready");
        Ok(Self { inner })
    }

    pub fn reply_topic(&self) -> &str {
        &self.inner.reply_topic
    }

    /// Publishes `msg` as a request. The outcome, a reply or a synthesized
    /// transport error, is delivered to `origin`.
    pub fn send(&self, origin: Arc<dyn Subscriber>, msg: Message) {
        let id = {
            let mut pending = self.inner.pending();
            pending.last_id += 1;
            let id = pending.last_id;
            pending.calls.insert(
                id,
                PendingCall {
                    origin,
                    msg: msg.clone(),
                },
            );
            id
        };

        let mut request = msg.request();
        request.correlation_id = id;
        request.reply_to = self.inner.reply_topic.clone();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let topic = msg.topic().to_string();
            let outcome = match request.to_bytes() {
                Ok(body) => inner
                    .transport
                    .publish(&topic, body)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(reason) = outcome {
                warn!(topic = %topic, correlation_id = id, error = %reason, "request not sent");
                inner.reply(id, msg.response_transport_error(reason));
            }
        });
    }

    /// Asks the service behind `uri` to republish its current state. Nothing
    /// is tracked for this call.
    pub async fn current(&self, uri: &str) -> Result<()> {
        let msg = Message::current(uri);
        let topic = format!("{}.current", msg.topic());
        self.inner.transport.publish(&topic, msg.to_bytes()?).await?;
        Ok(())
    }

    /// Forgets every pending request made by `origin`; replies arriving for
    /// them later are dropped.
    pub fn unsubscribe(&self, origin: &str) {
        let mut pending = self.inner.pending();
        let before = pending.calls.len();
        pending.calls.retain(|_, call| call.origin.id() != origin);
        let removed = before - pending.calls.len();
        if removed > 0 {
            debug!(origin, removed, "pending requests cancelled");
        }
    }

    /// Number of requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.inner.pending().calls.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the requester has shut down.
    pub async fn wait(&self) {
        self.inner.closed.cancelled().await;
    }
}

fn reply_topic_name(settings: &RequesterSettings) -> String {
    format!("{}.rsp-{}", settings.app_name, settings.instance_id)
}
