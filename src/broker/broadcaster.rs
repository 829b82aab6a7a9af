//! Per-topic broadcaster
//!
//! A `Broadcaster` is a cheap handle onto a control loop running on its own
//! task. The loop is the only owner of the listener set and handles one
//! command at a time in arrival order, so no lock guards the set.
//!
//! Delivery policy:
//! - submitting awaits room in the bounded command queue (backpressure)
//! - fan-out never awaits a listener; a listener whose buffer is full misses
//!   that message and its drop counter goes up
//! - a listener whose subscriber has gone away is pruned on the next fan-out
//! - once closed, every held listener is released exactly once and later
//!   commands are ignored

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::broker::listener::{Delivery, ListenerId, ListenerSink};
use crate::broker::message::Message;
use crate::utils::error::BrokerError;

#[derive(Debug)]
enum Command {
    Register(ListenerSink),
    Unregister(ListenerId),
    Submit(Message),
    ListenerCount(oneshot::Sender<usize>),
    Close,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    topic: Arc<str>,
    commands: mpsc::Sender<Command>,
}

impl Broadcaster {
    /// Spawns the control loop for `topic` on the current Tokio runtime.
    ///
    /// `capacity` bounds the command queue; zero is raised to one.
    pub fn new(topic: &str, capacity: usize) -> Self {
        let topic: Arc<str> = Arc::from(topic);
        let (commands, inbox) = mpsc::channel(capacity.max(1));

        let state = ControlLoop {
            topic: Arc::clone(&topic),
            inbox,
            listeners: HashMap::new(),
        };
        tokio::spawn(state.run());

        Self { topic, commands }
    }

    /// Adds a listener to the active set.
    ///
    /// Registering after close is ignored: the sink is dropped, which ends
    /// the listener's stream.
    pub async fn register(&self, listener: ListenerSink) {
        if self.commands.send(Command::Register(listener)).await.is_err() {
            debug!(topic = %self.topic, "Register after close ignored");
        }
    }

    /// Removes a listener if present and ends its stream. Unknown ids are a
    /// no-op.
    pub async fn unregister(&self, id: ListenerId) {
        let _ = self.commands.send(Command::Unregister(id)).await;
    }

    /// Queues `message` for every listener registered when it is processed.
    ///
    /// Waits while the command queue is full. A no-op after close.
    pub async fn submit(&self, message: Message) {
        if self.commands.send(Command::Submit(message)).await.is_err() {
            debug!(topic = %self.topic, "Submit after close ignored");
        }
    }

    /// Like [`Broadcaster::submit`] but fails instead of waiting.
    pub fn try_submit(&self, message: Message) -> Result<(), BrokerError> {
        self.commands.try_send(Command::Submit(message))?;
        Ok(())
    }

    /// Stops the loop and releases every registered listener. Idempotent.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    /// Number of registered listeners, or zero once closed.
    pub async fn listener_count(&self) -> usize {
        let (reply, count) = oneshot::channel();
        if self
            .commands
            .send(Command::ListenerCount(reply))
            .await
            .is_err()
        {
            return 0;
        }
        count.await.unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Resolves once the control loop has stopped taking commands.
    pub async fn closed(&self) {
        self.commands.closed().await;
    }
}

struct ControlLoop {
    topic: Arc<str>,
    inbox: mpsc::Receiver<Command>,
    listeners: HashMap<ListenerId, ListenerSink>,
}

impl ControlLoop {
    async fn run(mut self) {
        debug!(topic = %self.topic, "Broadcaster started");

        // Also ends when every handle has been dropped.
        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Register(sink) => {
                    debug!(topic = %self.topic, listener = %sink.id, "Listener registered");
                    self.listeners.insert(sink.id, sink);
                }
                Command::Unregister(id) => {
                    if let Some(sink) = self.listeners.remove(&id) {
                        sink.release();
                        debug!(topic = %self.topic, listener = %id, "Listener unregistered");
                    }
                }
                Command::Submit(message) => self.fan_out(message),
                Command::ListenerCount(reply) => {
                    let _ = reply.send(self.listeners.len());
                }
                Command::Close => break,
            }
        }

        self.shutdown();
    }

    fn fan_out(&mut self, message: Message) {
        let message = Arc::new(message);
        let topic = &self.topic;
        self.listeners
            .retain(|id, sink| match sink.deliver(&message) {
                Delivery::Sent | Delivery::Dropped => true,
                Delivery::Gone => {
                    debug!(topic = %topic, listener = %id, "Pruned listener with no subscriber");
                    false
                }
            });
    }

    fn shutdown(mut self) {
        // Refuse new commands, then discard what was already queued. Queued
        // registrations are dropped, which ends those listeners too.
        self.inbox.close();
        while let Ok(command) = self.inbox.try_recv() {
            if let Command::ListenerCount(reply) = command {
                let _ = reply.send(0);
            }
        }

        let released = self.listeners.len();
        for (_, sink) in self.listeners.drain() {
            sink.release();
        }
        info!(topic = %self.topic, released, "Broadcaster closed");
    }
}
