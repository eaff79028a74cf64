use serde::Deserialize;

/// Top-level configuration settings for the broker.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Where the WebSocket server binds and how many live sessions it admits.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

/// Delivery behaviour of the broker core.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub outbound_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub enable_device_support: bool,
}

/// Handshake headers that carry the already-authenticated identity.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub client_header: String,
    pub device_header: String,
    pub device_attribute_headers: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// What a broker push does when the target session's outbound queue is full.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Fail the push with `QueueFull`.
    #[default]
    Shed,
    /// Wait for room until the session closes.
    Block,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_connections: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub outbound_queue_capacity: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub enable_device_support: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub client_header: Option<String>,
    pub device_header: Option<String>,
    pub device_attribute_headers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                max_connections: 1000,
            },
            broker: BrokerSettings::default(),
            client: ClientSettings {
                client_header: "x-client-id".to_string(),
                device_header: "x-device-id".to_string(),
                device_attribute_headers: Vec::new(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            overflow_policy: OverflowPolicy::Shed,
            enable_device_support: true,
        }
    }
}
