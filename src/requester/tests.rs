use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

use super::Requester;
use crate::broker::message::{Message, MessageType};
use crate::client::{Client, Subscriber};
use crate::config::RequesterSettings;
use crate::transport::{Handler, MemoryTransport, Transport, TransportSubscription};
use crate::utils::{Error, TransportError};

fn origin(id: &str) -> (Arc<dyn Subscriber>, UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Client::with_id(id, tx).shared(), rx)
}

fn request(uri: &str, correlation_id: u64) -> Message {
    Message {
        correlation_id,
        ..Message::full(uri, 0, "ping")
    }
}

async fn next(rx: &mut UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

async fn nothing_more(rx: &mut UnboundedReceiver<Message>) {
    let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(got.is_err(), "unexpected delivery: {got:?}");
}

fn new_requester(transport: &MemoryTransport) -> (Requester, CancellationToken) {
    let shutdown = CancellationToken::new();
    let requester = Requester::new(
        Arc::new(transport.clone()),
        &RequesterSettings::default(),
        shutdown.clone(),
    )
    .unwrap();
    (requester, shutdown)
}

/// Answers every request on `topic` with `copies` replies.
fn echo_service(transport: &MemoryTransport, topic: &str, copies: usize) -> Box<dyn TransportSubscription> {
    let replies = transport.clone();
    transport
        .subscribe(
            topic,
            Arc::new(move |body: Vec<u8>| {
                let req = Message::from_bytes(&body).unwrap();
                let rsp = Message {
                    uri: req.uri.clone(),
                    msg_type: MessageType::Response,
                    payload: format!("pong {}", req.correlation_id),
                    correlation_id: req.correlation_id,
                    ..Default::default()
                };
                let replies = replies.clone();
                tokio::spawn(async move {
                    for _ in 0..copies {
                        replies
                            .publish(&req.reply_to, rsp.to_bytes().unwrap())
                            .await
                            .unwrap();
                    }
                });
            }),
        )
        .unwrap()
}

/// Records requests on `topic` without answering them.
fn silent_service(
    transport: &MemoryTransport,
    topic: &str,
) -> (Box<dyn TransportSubscription>, UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = transport
        .subscribe(
            topic,
            Arc::new(move |body: Vec<u8>| {
                let _ = tx.send(Message::from_bytes(&body).unwrap());
            }),
        )
        .unwrap();
    (sub, rx)
}

struct FailingTransport;

struct NoopSubscription;

impl TransportSubscription for NoopSubscription {
    fn close(&self) {}
}

#[async_trait]
impl Transport for FailingTransport {
    async fn publish(&self, topic: &str, _body: Vec<u8>) -> Result<(), TransportError> {
        Err(TransportError::Publish {
            topic: topic.to_string(),
            reason: "connection refused".to_string(),
        })
    }

    fn subscribe(
        &self,
        _topic: &str,
        _handler: Handler,
    ) -> Result<Box<dyn TransportSubscription>, TransportError> {
        Ok(Box::new(NoopSubscription))
    }

    fn close(&self) {}
}

#[tokio::test]
async fn test_reply_topic_name() {
    let transport = MemoryTransport::new();
    let settings = RequesterSettings {
        app_name: "odds".to_string(),
        instance_id: "7".to_string(),
    };
    let requester = Requester::new(Arc::new(transport.clone()), &settings, CancellationToken::new())
        .unwrap();
    assert_eq!(requester.reply_topic(), "odds.rsp-7");
    assert_eq!(transport.subscribers("odds.rsp-7"), 1);
}

#[tokio::test]
async fn test_send_delivers_reply_with_callers_correlation_id() {
    let transport = MemoryTransport::new();
    let (requester, _shutdown) = new_requester(&transport);
    let _service = echo_service(&transport, "odds", 1);
    let (caller, mut rx) = origin("caller");

    requester.send(caller, request("odds/m_1", 42));

    let reply = next(&mut rx).await;
    assert_eq!(reply.correlation_id, 42);
    assert_eq!(reply.payload, "pong 1");
    assert_eq!(reply.msg_type, MessageType::Response);
    assert_eq!(requester.pending(), 0);
}

#[tokio::test]
async fn test_request_carries_internal_id_and_reply_topic() {
    let transport = MemoryTransport::new();
    let (requester, _shutdown) = new_requester(&transport);
    let (_service, mut requests) = silent_service(&transport, "odds");
    let (caller, _rx) = origin("caller");

    requester.send(caller, request("odds/m_1", 42));

    let req = next(&mut requests).await;
    assert_eq!(req.msg_type, MessageType::Request);
    assert_eq!(req.correlation_id, 1);
    assert_eq!(req.reply_to, requester.reply_topic());
    assert_eq!(req.payload, "ping");
}

#[tokio::test]
async fn test_publish_failure_yields_one_error_response() {
    let requester = Requester::new(
        Arc::new(FailingTransport),
        &RequesterSettings::default(),
        CancellationToken::new(),
    )
    .unwrap();
    let (caller, mut rx) = origin("caller");

    requester.send(caller, request("odds/m_1", 5));

    let reply = next(&mut rx).await;
    assert_eq!(reply.correlation_id, 5);
    assert_eq!(reply.msg_type, MessageType::Response);
    assert_eq!(
        reply.error.as_deref(),
        Some("publish to odds failed: connection refused")
    );
    nothing_more(&mut rx).await;
    assert_eq!(requester.pending(), 0);
}

#[tokio::test]
async fn test_duplicate_reply_is_ignored() {
    let transport = MemoryTransport::new();
    let (requester, _shutdown) = new_requester(&transport);
    let _service = echo_service(&transport, "odds", 2);
    let (caller, mut rx) = origin("caller");

    requester.send(caller, request("odds/m_1", 3));

    assert_eq!(next(&mut rx).await.correlation_id, 3);
    nothing_more(&mut rx).await;
}

#[tokio::test]
async fn test_unsubscribe_before_late_reply_suppresses_delivery() {
    let transport = MemoryTransport::new();
    let (requester, _shutdown) = new_requester(&transport);
    let (_service, mut requests) = silent_service(&transport, "odds");
    let (caller, mut rx) = origin("caller");
    let (other, mut other_rx) = origin("other");

    requester.send(caller, request("odds/m_1", 1));
    requester.send(other, request("odds/m_2", 2));
    let first = next(&mut requests).await;
    let second = next(&mut requests).await;
    assert_eq!(requester.pending(), 2);

    requester.unsubscribe("caller");
    assert_eq!(requester.pending(), 1);

    for req in [first, second] {
        let rsp = Message {
            msg_type: MessageType::Response,
            ..req.clone()
        };
        transport
            .publish(&req.reply_to, rsp.to_bytes().unwrap())
            .await
            .unwrap();
    }

    assert_eq!(next(&mut other_rx).await.correlation_id, 2);
    nothing_more(&mut rx).await;
    assert_eq!(requester.pending(), 0);
}

#[tokio::test]
async fn test_unknown_and_garbage_replies_are_discarded() {
    let transport = MemoryTransport::new();
    let (requester, _shutdown) = new_requester(&transport);
    let (caller, mut rx) = origin("caller");
    let (_service, mut requests) = silent_service(&transport, "odds");

    requester.send(caller, request("odds/m_1", 1));
    next(&mut requests).await;

    let stray = Message {
        correlation_id: 999,
        ..Message::default()
    };
    transport
        .publish(requester.reply_topic(), stray.to_bytes().unwrap())
        .await
        .unwrap();
    transport
        .publish(requester.reply_topic(), b"{broken".to_vec())
        .await
        .unwrap();

    nothing_more(&mut rx).await;
    assert_eq!(requester.pending(), 1);
}

#[tokio::test]
async fn test_correlation_ids_are_strictly_increasing() {
    let transport = MemoryTransport::new();
    let (requester, _shutdown) = new_requester(&transport);
    let (_service, mut requests) = silent_service(&transport, "odds");
    let (caller, _rx) = origin("caller");

    for _ in 0..5 {
        requester.send(caller.clone(), request("odds/m_1", 0));
    }

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(next(&mut requests).await.correlation_id);
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_each_get_exactly_one_reply() {
    let transport = MemoryTransport::new();
    let (requester, _shutdown) = new_requester(&transport);
    let _service = echo_service(&transport, "odds", 1);

    let mut callers = Vec::new();
    let mut tasks = Vec::new();
    for c in 0..5 {
        let (caller, rx) = origin(&format!("caller-{c}"));
        callers.push(rx);
        let requester = requester.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..10 {
                requester.send(caller.clone(), request("odds/m_1", n));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for mut rx in callers {
        let mut ids = Vec::new();
        for _ in 0..10 {
            ids.push(next(&mut rx).await.correlation_id);
        }
        ids.sort_unstable();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        nothing_more(&mut rx).await;
    }
    assert_eq!(requester.pending(), 0);
}

#[tokio::test]
async fn test_shutdown_drops_pending_and_closes_transport() {
    let transport = MemoryTransport::new();
    let (requester, shutdown) = new_requester(&transport);
    let (_service, mut requests) = silent_service(&transport, "odds");
    let (caller, mut rx) = origin("caller");

    requester.send(caller, request("odds/m_1", 1));
    next(&mut requests).await;
    assert_eq!(requester.pending(), 1);
    assert!(!requester.is_closed());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), requester.wait())
        .await
        .expect("wait did not resolve");

    assert!(requester.is_closed());
    assert_eq!(requester.pending(), 0);
    assert!(transport.is_closed());
    assert_eq!(transport.subscribers(requester.reply_topic()), 0);
    // dropped calls are not notified
    nothing_more(&mut rx).await;
}

#[tokio::test]
async fn test_new_fails_without_reply_subscription() {
    let transport = MemoryTransport::new();
    transport.close();
    let result = Requester::new(
        Arc::new(transport),
        &RequesterSettings::default(),
        CancellationToken::new(),
    );
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Closed))
    ));
}

#[tokio::test]
async fn test_current_publishes_untracked() {
    let transport = MemoryTransport::new();
    let (requester, _shutdown) = new_requester(&transport);
    let (_service, mut current) = silent_service(&transport, "odds.current");

    requester.current("odds/m_1").await.unwrap();

    let msg = next(&mut current).await;
    assert_eq!(msg.msg_type, MessageType::Current);
    assert_eq!(msg.uri, "odds/m_1");
    assert_eq!(msg.correlation_id, 0);
    assert_eq!(requester.pending(), 0);
}
