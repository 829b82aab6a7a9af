//! Topic manager
//!
//! This module contains the registry that maps topic identifiers (payment
//! ids) to their [`Broadcaster`]. It is responsible for:
//! - creating a broadcaster the first time a topic is opened or published to
//! - routing listener registrations, unregistrations and messages to it
//! - closing and forgetting a broadcaster when its topic is deleted
//!
//! Concurrency and usage notes:
//! - `TopicManager` is a cloneable handle. Every clone talks to the same
//!   control loop, which is the only code touching the topic map, so the map
//!   needs no lock and all registry changes are totally ordered.
//! - Requests are queued with bounded capacity; callers wait for room rather
//!   than having requests dropped.
//! - A publish racing a delete of the same topic resolves by arrival order:
//!   if the delete is processed first the message goes to a fresh broadcaster.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::broker::broadcaster::Broadcaster;
use crate::broker::listener::{self, Listener, ListenerId, ListenerSink};
use crate::broker::message::Message;
use crate::config::BrokerSettings;
use crate::utils::error::BrokerError;

#[derive(Debug)]
enum Request {
    Open {
        topic: String,
        listener: ListenerSink,
    },
    Close {
        topic: String,
        id: ListenerId,
    },
    Delete {
        topic: String,
    },
    Submit {
        topic: String,
        message: Message,
    },
    Topics(oneshot::Sender<Vec<String>>),
    ListenerCount {
        topic: String,
        reply: oneshot::Sender<Option<usize>>,
    },
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct TopicManager {
    requests: mpsc::Sender<Request>,
    listener_capacity: usize,
}

impl TopicManager {
    /// Spawns the manager's control loop on the current Tokio runtime.
    pub fn new(settings: &BrokerSettings) -> Self {
        let (requests, inbox) = mpsc::channel(settings.manager_queue_capacity.max(1));

        let registry = Registry {
            inbox,
            broadcasts: HashMap::new(),
            broadcaster_capacity: settings.broadcaster_queue_capacity,
        };
        tokio::spawn(registry.run());

        Self {
            requests,
            listener_capacity: settings.listener_capacity,
        }
    }

    /// Creates a listener and queues its registration on `topic`.
    ///
    /// Returns as soon as the request is queued. The registration is ordered
    /// before any request this caller makes afterwards.
    pub async fn open_listener(&self, topic: &str) -> Listener {
        let (sink, listener) = listener::channel(self.listener_capacity);
        self.send(Request::Open {
            topic: topic.to_string(),
            listener: sink,
        })
        .await;
        listener
    }

    /// Like [`TopicManager::open_listener`], but the returned guard
    /// unregisters the listener when dropped.
    pub async fn subscribe(&self, topic: &str) -> Subscription {
        let listener = self.open_listener(topic).await;
        Subscription {
            manager: self.clone(),
            topic: Arc::from(topic),
            listener,
            released: false,
        }
    }

    /// Unregisters `id` from `topic`. A no-op when either is unknown.
    pub async fn close_listener(&self, topic: &str, id: ListenerId) {
        self.send(Request::Close {
            topic: topic.to_string(),
            id,
        })
        .await;
    }

    /// Publishes `text` on `topic`, creating the topic if it is unseen.
    pub async fn submit(&self, sender: &str, topic: &str, text: &str) {
        self.send(Request::Submit {
            topic: topic.to_string(),
            message: Message::for_topic(sender, topic, text),
        })
        .await;
    }

    /// Like [`TopicManager::submit`] but fails instead of waiting for room.
    pub fn try_submit(&self, sender: &str, topic: &str, text: &str) -> Result<(), BrokerError> {
        self.requests.try_send(Request::Submit {
            topic: topic.to_string(),
            message: Message::for_topic(sender, topic, text),
        })?;
        Ok(())
    }

    /// Closes `topic`'s broadcaster, ending every listener still on it, and
    /// removes the topic. A no-op for unknown topics.
    pub async fn delete_broadcast(&self, topic: &str) {
        self.send(Request::Delete {
            topic: topic.to_string(),
        })
        .await;
    }

    /// Topics that currently have a broadcaster, sorted.
    pub async fn topics(&self) -> Vec<String> {
        let (reply, topics) = oneshot::channel();
        self.send(Request::Topics(reply)).await;
        topics.await.unwrap_or_default()
    }

    /// Listeners registered on `topic`, or `None` if it has no broadcaster.
    pub async fn listener_count(&self, topic: &str) -> Option<usize> {
        let (reply, count) = oneshot::channel();
        self.send(Request::ListenerCount {
            topic: topic.to_string(),
            reply,
        })
        .await;
        count.await.ok().flatten()
    }

    /// Closes every broadcaster and stops the control loop.
    ///
    /// Afterwards every operation is a no-op and new listeners end at once.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        self.send(Request::Shutdown(reply)).await;
        let _ = done.await;
    }

    async fn send(&self, request: Request) {
        if self.requests.send(request).await.is_err() {
            debug!("Topic manager has shut down, request ignored");
        }
    }

    /// Queues an unregistration without waiting, for use from `Drop`.
    fn release(&self, topic: &str, id: ListenerId) {
        let request = Request::Close {
            topic: topic.to_string(),
            id,
        };
        match self.requests.try_send(request) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(request)) => match Handle::try_current() {
                Ok(handle) => {
                    let requests = self.requests.clone();
                    handle.spawn(async move {
                        let _ = requests.send(request).await;
                    });
                }
                Err(_) => {
                    warn!(listener = %id, topic = %topic, "No runtime to unregister listener")
                }
            },
        }
    }
}

/// A listener that unregisters itself when dropped.
///
/// Every exit path of a subscriber (return, error, task abort) ends in a
/// `CloseListener` request.
#[derive(Debug)]
pub struct Subscription {
    manager: TopicManager,
    topic: Arc<str>,
    listener: Listener,
    released: bool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> ListenerId {
        self.listener.id()
    }

    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.listener.recv().await
    }

    /// Unregisters now, waiting for the request to be queued.
    pub async fn close(mut self) {
        self.released = true;
        self.manager
            .close_listener(&self.topic, self.listener.id())
            .await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.released {
            self.manager.release(&self.topic, self.listener.id());
        }
    }
}

struct Registry {
    inbox: mpsc::Receiver<Request>,
    broadcasts: HashMap<String, Broadcaster>,
    broadcaster_capacity: usize,
}

impl Registry {
    async fn run(mut self) {
        let mut shutdown_reply = None;

        while let Some(request) = self.inbox.recv().await {
            match request {
                Request::Open { topic, listener } => {
                    debug!(topic = %topic, listener = %listener.id(), "Opening listener");
                    self.broadcast(&topic).register(listener).await;
                }
                Request::Close { topic, id } => {
                    // never creates a broadcaster
                    if let Some(broadcaster) = self.broadcasts.get(&topic) {
                        broadcaster.unregister(id).await;
                    }
                }
                Request::Delete { topic } => {
                    if let Some(broadcaster) = self.broadcasts.remove(&topic) {
                        broadcaster.close().await;
                        info!(topic = %topic, "Broadcast deleted");
                    }
                }
                Request::Submit { topic, message } => {
                    self.broadcast(&topic).submit(message).await;
                }
                Request::Topics(reply) => {
                    let mut topics: Vec<String> = self.broadcasts.keys().cloned().collect();
                    topics.sort();
                    let _ = reply.send(topics);
                }
                Request::ListenerCount { topic, reply } => {
                    let count = match self.broadcasts.get(&topic) {
                        Some(broadcaster) => Some(broadcaster.listener_count().await),
                        None => None,
                    };
                    let _ = reply.send(count);
                }
                Request::Shutdown(reply) => {
                    shutdown_reply = Some(reply);
                    break;
                }
            }
        }

        self.shutdown().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    /// The broadcaster for `topic`, created on first use.
    fn broadcast(&mut self, topic: &str) -> &Broadcaster {
        let capacity = self.broadcaster_capacity;
        self.broadcasts.entry(topic.to_string()).or_insert_with(|| {
            info!(topic = %topic, "Creating broadcaster");
            Broadcaster::new(topic, capacity)
        })
    }

    async fn shutdown(mut self) {
        self.inbox.close();
        while let Ok(request) = self.inbox.try_recv() {
            match request {
                Request::Shutdown(reply) => {
                    let _ = reply.send(());
                }
                // dropping queued listeners ends their streams
                _ => {}
            }
        }

        for (topic, broadcaster) in self.broadcasts.drain() {
            broadcaster.close().await;
            debug!(topic = %topic, "Broadcaster closed on shutdown");
        }
        info!("Topic manager stopped");
    }
}
