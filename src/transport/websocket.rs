use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{ListenerId, Subscription, TopicManager};
use crate::config::ServerSettings;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::error::TransportError;

/// Binds the configured address and serves WebSocket clients until the task
/// is dropped.
pub async fn start_websocket_server(
    settings: &ServerSettings,
    manager: TopicManager,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, manager, settings.outbound_capacity).await;
    Ok(())
}

/// Accepts connections on an already bound listener.
///
/// `outbound_capacity` bounds the frames queued per connection.
pub async fn serve(listener: TcpListener, manager: TopicManager, outbound_capacity: usize) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                continue;
            }
        };
        let manager = manager.clone();

        tokio::spawn(async move {
            debug!("Connection from {peer}");
            handle_connection(stream, manager, outbound_capacity).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, manager: TopicManager, outbound_capacity: usize) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let client_id = format!("client-{}", uuid::Uuid::new_v4());
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Everything headed to the client goes through this bounded channel.
    // When the client stops reading, forwarders wait here and the listener
    // buffers behind them fill up and start dropping.
    let (tx, mut rx) = mpsc::channel::<WsMessage>(outbound_capacity.max(1));

    let writer_id = client_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!("Failed to send message to {writer_id}: {e}");
                break;
            }
        }
        debug!("Send loop closed for {writer_id}");
    });

    let mut session = Session::new(client_id, manager, tx);

    while let Some(frame) = ws_receiver.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Read error from {}: {e}", session.client_id);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        match msg.to_text() {
            Ok(text) => session.handle(text).await,
            Err(e) => warn!("Unreadable frame from {}: {e}", session.client_id),
        }
    }

    info!("{} disconnected", session.client_id);
}

pub(crate) struct Session {
    pub(crate) client_id: String,
    manager: TopicManager,
    outbound: Sender<WsMessage>,
    pub(crate) subscriptions: HashMap<String, (ListenerId, JoinHandle<()>)>,
}

impl Session {
    pub(crate) fn new(
        client_id: String,
        manager: TopicManager,
        outbound: Sender<WsMessage>,
    ) -> Self {
        Self {
            client_id,
            manager,
            outbound,
            subscriptions: HashMap::new(),
        }
    }

    pub(crate) async fn handle(&mut self, text: &str) {
        self.prune_finished();

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { topic }) => {
                let subscription = self.manager.subscribe(&topic).await;
                let id = subscription.id();
                let forwarder = forward(subscription, self.outbound.clone());
                if let Some((old_id, old)) =
                    self.subscriptions.insert(topic.clone(), (id, forwarder))
                {
                    old.abort();
                    self.manager.close_listener(&topic, old_id).await;
                }
                info!("{} subscribed to {topic}", self.client_id);
                self.reply(&ServerMessage::Subscribed { topic }).await;
            }
            Ok(ClientMessage::Unsubscribe { topic }) => {
                if let Some((id, forwarder)) = self.subscriptions.remove(&topic) {
                    forwarder.abort();
                    self.manager.close_listener(&topic, id).await;
                    info!("{} unsubscribed from {topic}", self.client_id);
                }
            }
            Ok(ClientMessage::Publish {
                topic,
                text,
                sender,
            }) => {
                let sender = sender.as_deref().unwrap_or(&self.client_id);
                self.manager.submit(sender, &topic, &text).await;
                debug!("{} published to {topic}", self.client_id);
            }
            Ok(ClientMessage::Delete { topic }) => {
                self.manager.delete_broadcast(&topic).await;
                info!("{} deleted {topic}", self.client_id);
            }
            Err(err) => {
                warn!(
                    "Invalid client message from {}: {err} | {}",
                    self.client_id,
                    text.chars().take(100).collect::<String>()
                );
                self.reply(&ServerMessage::Error {
                    message: format!("invalid message: {err}"),
                })
                .await;
            }
        }
    }

    /// Forgets subscriptions whose topic was deleted.
    fn prune_finished(&mut self) {
        self.subscriptions
            .retain(|_, (_, forwarder)| !forwarder.is_finished());
    }

    async fn reply(&self, message: &ServerMessage) {
        if let Err(e) = send_json(&self.outbound, message).await {
            debug!("Reply to {} not sent: {e}", self.client_id);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Aborting drops each task's Subscription, which unregisters it.
        for (_, (_, forwarder)) in self.subscriptions.drain() {
            forwarder.abort();
        }
    }
}

/// Pumps one subscription's messages onto the connection, waiting whenever
/// the connection's queue is full.
pub(crate) fn forward(
    mut subscription: Subscription,
    outbound: Sender<WsMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            let event = ServerMessage::Message {
                topic: subscription.topic().to_string(),
                sender: message.sender.clone(),
                text: message.text.clone(),
                timestamp: message.timestamp,
            };
            match send_json(&outbound, &event).await {
                Ok(()) => {}
                Err(TransportError::Disconnected) => return,
                Err(e) => error!("Dropping message for {}: {e}", subscription.topic()),
            }
        }

        let _ = send_json(
            &outbound,
            &ServerMessage::Closed {
                topic: subscription.topic().to_string(),
            },
        )
        .await;
    })
}

async fn send_json(
    outbound: &Sender<WsMessage>,
    message: &ServerMessage,
) -> Result<(), TransportError> {
    let json = serde_json::to_string(message)?;
    outbound
        .send(WsMessage::text(json))
        .await
        .map_err(|_| TransportError::Disconnected)
}
