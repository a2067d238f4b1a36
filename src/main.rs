//! CLI for spreadbus
//!
//! Subcommands:
//! - `server`: run the WebSocket front end over an in-process transport
//! - `client`: subscribe to one topic and print every frame received

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use spreadbus::config::load_config;
use spreadbus::transport::websocket::start_websocket_server;
use spreadbus::utils::logging;
use spreadbus::{Broker, MemoryTransport, Requester, Transport};

#[derive(Parser)]
#[command(name = "spreadbus")]
enum Command {
    /// Start the WebSocket server
    Server,
    /// Subscribe to a topic and print what arrives
    Client {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long)]
        topic: String,
        /// Last `ts` already known for the topic
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    logging::init(&std::env::var("SPREADBUS_LOG").unwrap_or_else(|_| "info".to_string()));

    let result = match Command::parse() {
        Command::Server => run_server().await,
        Command::Client { url, topic, offset } => run_client(&url, &topic, offset).await,
    };
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown = CancellationToken::new();

    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let broker = Broker::new();
    let reaper = broker.spawn_reaper(
        Duration::from_secs(config.broker.reap_interval_secs),
        Duration::from_secs(config.broker.idle_timeout_secs),
        shutdown.clone(),
    );
    let requester = Requester::new(transport, &config.requester, shutdown.clone())?;

    tokio::select! {
        res = start_websocket_server(&addr, broker, requester.clone()) => {
            if let Err(e) = res {
                error!("WebSocket server exited: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    shutdown.cancel();
    requester.wait().await;
    let _ = reaper.await;
    Ok(())
}

async fn run_client(url: &str, topic: &str, offset: i64) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws_stream, _response) = connect_async(url).await?;

    let subscribe = json!({ "type": "subscribe", "topics": { topic: offset } });
    ws_stream
        .send(WsMessage::Text(subscribe.to_string().into()))
        .await?;

    while let Some(frame) = ws_stream.next().await {
        if let WsMessage::Text(text) = frame? {
            println!("{}", text.as_str());
        }
    }
    Ok(())
}
