use serde::{Deserialize, Serialize};

/// Frames a WebSocket client may send.
#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },

    /// `sender` defaults to the connection's id.
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },

    #[serde(rename = "delete")]
    Delete { topic: String },
}

/// Frames the server sends back.
#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The registration is queued; anything published afterwards reaches it.
    #[serde(rename = "subscribed")]
    Subscribed { topic: String },

    #[serde(rename = "message")]
    Message {
        topic: String,
        sender: String,
        text: String,
        timestamp: i64,
    },

    /// The topic was deleted or the server is shutting down.
    #[serde(rename = "closed")]
    Closed { topic: String },

    #[serde(rename = "error")]
    Error { message: String },
}
