use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A status update fanned out to the listeners of one topic.
///
/// A message is immutable once built. `topic` is only filled in when the
/// message was routed through the topic manager, so a broadcaster used on its
/// own can carry messages without one.
///
/// # Fields
///
/// - `sender` - Identifier of whoever submitted the message.
/// - `topic` - The topic (payment id) the message was routed to, if any.
/// - `text` - Human readable payload, e.g. `"payment is created"`.
/// - `timestamp` - Unix timestamp in milliseconds taken at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub topic: Option<String>,
    pub text: String,
    pub timestamp: i64,
}

impl Message {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            topic: None,
            text: text.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn for_topic(
        sender: impl Into<String>,
        topic: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::new(sender, text)
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.sender, self.text)
    }
}

/// What travels through a listener channel.
///
/// `Close` is the end-of-stream marker a broadcaster sends when it releases a
/// listener. A dropped channel means the same thing.
#[derive(Debug, Clone)]
pub enum Event {
    Data(Arc<Message>),
    Close,
}
