use super::pubsub_client::{Client, Subscriber};
use crate::broker::message::Message;
use tokio::sync::mpsc;

#[test]
fn test_client_new() {
    let (tx, _) = mpsc::unbounded_channel::<Message>();
    let client = Client::new(tx);
    assert!(client.id.starts_with("client-"));
    assert_eq!(client.id(), client.id.as_str());
}

#[test]
fn test_client_ids_are_unique() {
    let (tx, _) = mpsc::unbounded_channel::<Message>();
    let a = Client::new(tx.clone());
    let b = Client::new(tx);
    assert_ne!(a.id, b.id);
}

#[test]
fn test_send_msgs_keeps_order() {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let client = Client::with_id("c1", tx);
    client.send_msgs(vec![Message::full("1", 1, "a"), Message::diff("1", 2, "b")]);

    assert_eq!(rx.try_recv().unwrap().ts, 1);
    assert_eq!(rx.try_recv().unwrap().ts, 2);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_send_to_closed_channel_does_not_panic() {
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let client = Client::with_id("c1", tx);
    drop(rx);
    client.send(Message::full("1", 1, "a"));
}
