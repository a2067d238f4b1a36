use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::broker::message::Message;
use crate::client::{Client, Subscriber};
use crate::requester::Requester;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::Result;

/// Frame queued for a connection's writer.
#[derive(Debug)]
enum Outbound {
    Message(Message),
    Control(ServerMessage),
}

/// Accepts WebSocket connections on `addr` until the listener fails.
pub async fn start_websocket_server(addr: &str, broker: Broker, requester: Requester) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "WebSocket server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "connection accepted");
        tokio::spawn(handle_connection(stream, broker.clone(), requester.clone()));
    }
}

async fn handle_connection(stream: TcpStream, broker: Broker, requester: Requester) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let client: Arc<dyn Subscriber> = Client::new(tx).shared();
    let client_id = client.id().to_string();

    // control frames share the writer with broker deliveries
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let outbound = tokio::select! {
                Some(msg) = rx.recv() => Outbound::Message(msg),
                Some(ctrl) = control_rx.recv() => Outbound::Control(ctrl),
                else => break,
            };
            let text = match &outbound {
                Outbound::Message(msg) => serde_json::to_string(msg),
                Outbound::Control(ctrl) => serde_json::to_string(ctrl),
            };
            let text = match text {
                Ok(text) => text,
                Err(e) => {
                    warn!(client = %writer_id, error = %e, "failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(WsMessage::text(text)).await {
                debug!(client = %writer_id, error = %e, "send loop closed");
                break;
            }
        }
    });

    info!(client = %client_id, "connected");

    while let Some(Ok(frame)) = ws_receiver.next().await {
        let Ok(text) = frame.to_text() else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(cmd) => {
                if let Err(e) = dispatch(cmd, &client, &broker, &requester, &control_tx).await {
                    let _ = control_tx.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            }
            Err(e) => {
                warn!(client = %client_id, error = %e, "invalid client message");
                let _ = control_tx.send(ServerMessage::Error {
                    message: format!("invalid message: {e}"),
                });
            }
        }
    }

    info!(client = %client_id, "disconnected");
    if let Err(e) = broker.unsubscribe(&client_id) {
        warn!(client = %client_id, error = %e, "cleanup failed");
    }
    requester.unsubscribe(&client_id);
    writer.abort();
}

/// Applies one client frame.
pub(crate) async fn dispatch(
    cmd: ClientMessage,
    client: &Arc<dyn Subscriber>,
    broker: &Broker,
    requester: &Requester,
    control: &mpsc::UnboundedSender<ServerMessage>,
) -> Result<()> {
    match cmd {
        ClientMessage::Subscribe { topics } => {
            debug!(client = %client.id(), topics = ?topics, "subscribe");
            broker.subscribe(client.clone(), topics)?;
        }
        ClientMessage::Unsubscribe => {
            broker.unsubscribe(client.id())?;
        }
        ClientMessage::Publish {
            uri,
            ts,
            update_type,
            payload,
        } => {
            let ts = ts.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            broker.publish(Message {
                uri,
                ts,
                update_type,
                payload,
                ..Default::default()
            })?;
        }
        ClientMessage::Request {
            uri,
            payload,
            correlation_id,
        } => {
            requester.send(
                client.clone(),
                Message {
                    uri,
                    payload,
                    correlation_id,
                    ..Default::default()
                },
            );
        }
        ClientMessage::Current { uri } => {
            requester.current(&uri).await?;
        }
        ClientMessage::Replay { uri } => {
            let messages = broker.replay(&uri).await?;
            let _ = control.send(ServerMessage::Replay { messages });
        }
    }
    Ok(())
}
