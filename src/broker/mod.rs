pub mod broadcaster;
pub mod engine;
pub mod listener;
pub mod message;

pub use broadcaster::Broadcaster;
pub use engine::{Subscription, TopicManager};
pub use listener::{Listener, ListenerId, ListenerSink};
pub use message::{Event, Message};

#[cfg(test)]
mod tests;
