//! Listener channels
//!
//! A listener is a bounded, single-writer/single-reader queue split in two:
//! the [`ListenerSink`] is handed to exactly one broadcaster, which writes to
//! it, and the [`Listener`] stays with the subscriber, which reads from it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

use crate::broker::message::{Event, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Creates a listener with room for `capacity` undelivered messages.
///
/// A capacity of zero is raised to one.
pub fn channel(capacity: usize) -> (ListenerSink, Listener) {
    let id = ListenerId::new();
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        ListenerSink {
            id,
            sender,
            dropped: 0,
        },
        Listener {
            id,
            receiver,
            ended: false,
        },
    )
}

/// The writing half of a listener, owned by the broadcaster it is registered to.
///
/// Not `Clone`: a registration lives in one place only.
#[derive(Debug)]
pub struct ListenerSink {
    pub(crate) id: ListenerId,
    pub(crate) sender: mpsc::Sender<Event>,
    pub(crate) dropped: u64,
}

/// Outcome of a single non-blocking delivery attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    Dropped,
    Gone,
}

impl ListenerSink {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Number of messages this listener missed because its buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn deliver(&mut self, message: &Arc<Message>) -> Delivery {
        match self.sender.try_send(Event::Data(Arc::clone(message))) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(
                    listener = %self.id,
                    dropped = self.dropped,
                    "Listener buffer full, dropping message"
                );
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Signals end-of-stream. Consuming the sink makes this happen once.
    ///
    /// If the buffer is full the `Close` marker is skipped; dropping the
    /// sender still ends the stream once the subscriber drains what is queued.
    pub fn release(self) {
        let _ = self.sender.try_send(Event::Close);
    }
}

/// The reading half of a listener, held by the subscriber.
#[derive(Debug)]
pub struct Listener {
    pub(crate) id: ListenerId,
    pub(crate) receiver: mpsc::Receiver<Event>,
    ended: bool,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Waits for the next delivered message.
    ///
    /// Returns `None` once the listener has been released, and keeps
    /// returning `None` afterwards.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        if self.ended {
            return None;
        }
        match self.receiver.recv().await {
            Some(Event::Data(message)) => Some(message),
            Some(Event::Close) | None => {
                self.end();
                None
            }
        }
    }

    /// Non-blocking variant of [`Listener::recv`].
    ///
    /// `Err(TryRecvError::Empty)` means nothing is queued yet,
    /// `Err(TryRecvError::Disconnected)` means the stream has ended.
    pub fn try_recv(&mut self) -> Result<Arc<Message>, TryRecvError> {
        if self.ended {
            return Err(TryRecvError::Disconnected);
        }
        match self.receiver.try_recv() {
            Ok(Event::Data(message)) => Ok(message),
            Ok(Event::Close) | Err(TryRecvError::Disconnected) => {
                self.end();
                Err(TryRecvError::Disconnected)
            }
            Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn end(&mut self) {
        self.ended = true;
        self.receiver.close();
    }
}
