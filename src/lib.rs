//! # Paystream
//!
//! `paystream` pushes payment status updates to live subscribers. Each
//! payment id is a topic with its own broadcaster; a topic manager creates,
//! routes through and tears down those broadcasters on demand.
//!
//! ## Core Modules
//!
//! - `broker`: broadcasters, listeners and the topic manager control loop.
//! - `notify`: the status notices published after payment and product changes.
//! - `config`: loading server and queue settings.
//! - `transport`: a WebSocket adapter over the topic manager.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod config;
pub mod notify;
pub mod transport;
pub mod utils;
