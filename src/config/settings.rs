use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Address the WebSocket adapter binds to.
///
/// `outbound_capacity` bounds the frames queued for one connection. A client
/// that stops reading fills it, and its listeners start missing messages.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub outbound_capacity: usize,
}

/// Queue sizes for the topic manager and its broadcasters.
///
/// Every queue is bounded. A full control queue makes the caller wait; a
/// full listener buffer makes that listener miss the message.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub manager_queue_capacity: usize,
    pub broadcaster_queue_capacity: usize,
    pub listener_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled in from the defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub outbound_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub manager_queue_capacity: Option<usize>,
    pub broadcaster_queue_capacity: Option<usize>,
    pub listener_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            outbound_capacity: 64,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            manager_queue_capacity: 100,
            broadcaster_queue_capacity: 10,
            listener_capacity: 16,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
                outbound_capacity: server
                    .outbound_capacity
                    .unwrap_or(defaults.server.outbound_capacity),
            },
            broker: BrokerSettings {
                manager_queue_capacity: broker
                    .manager_queue_capacity
                    .unwrap_or(defaults.broker.manager_queue_capacity),
                broadcaster_queue_capacity: broker
                    .broadcaster_queue_capacity
                    .unwrap_or(defaults.broker.broadcaster_queue_capacity),
                listener_capacity: broker
                    .listener_capacity
                    .unwrap_or(defaults.broker.listener_capacity),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}
