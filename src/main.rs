//! CLI for Paystream
//!
//! Subcommands:
//! - `server`: run the WebSocket server
//! - `listen`: subscribe to a payment topic and print every update
//! - `publish`: send one status update to a payment topic

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use paystream::broker::TopicManager;
use paystream::config::load_config;
use paystream::transport::message::{ClientMessage, ServerMessage};
use paystream::transport::start_websocket_server;
use paystream::utils::logging;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use tungstenite::protocol::Message as WsMessage;

#[derive(Parser)]
#[command(name = "paystream")]
enum Command {
    /// Start the WebSocket server
    Server,
    /// Subscribe to a topic and print updates until it is deleted
    Listen {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Payment id to follow
        #[arg(long)]
        topic: String,
    },
    /// Publish a single update
    Publish {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        sender: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let result = match cmd {
        Command::Server => run_server().await,
        Command::Listen { url, topic } => {
            logging::init("info");
            run_listen(&url, topic).await
        }
        Command::Publish {
            url,
            topic,
            text,
            sender,
        } => {
            logging::init("info");
            run_publish(&url, topic, text, sender).await
        }
    };

    if let Err(e) = result {
        error!("paystream failed: {e}");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    logging::init(&config.logging.level);

    let manager = TopicManager::new(&config.broker);

    tokio::select! {
        res = start_websocket_server(&config.server, manager.clone()) => {
            res?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn run_listen(url: &str, topic: String) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws, _) = connect_async(url).await?;

    let subscribe = serde_json::to_string(&ClientMessage::Subscribe { topic })?;
    ws.send(WsMessage::text(subscribe)).await?;

    while let Some(frame) = ws.next().await {
        let frame = frame?;
        if !frame.is_text() {
            continue;
        }
        match serde_json::from_str::<ServerMessage>(frame.to_text()?) {
            Ok(ServerMessage::Subscribed { topic }) => info!("Listening on {topic}"),
            Ok(ServerMessage::Message { sender, text, .. }) => println!("{sender} → {text}"),
            Ok(ServerMessage::Closed { topic }) => {
                info!("Topic {topic} closed");
                break;
            }
            Ok(ServerMessage::Error { message }) => warn!("Server error: {message}"),
            Err(e) => warn!("Unexpected frame: {e}"),
        }
    }

    Ok(())
}

async fn run_publish(
    url: &str,
    topic: String,
    text: String,
    sender: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut ws, _) = connect_async(url).await?;

    let publish = serde_json::to_string(&ClientMessage::Publish {
        topic: topic.clone(),
        text,
        sender,
    })?;
    ws.send(WsMessage::text(publish)).await?;
    ws.close(None).await?;

    info!("Published to {topic}");
    Ok(())
}
