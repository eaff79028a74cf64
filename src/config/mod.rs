mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, ClientSettings, LoggingSettings, OverflowPolicy, ServerSettings, Settings,
};

/// Environment variables look like `PUSHLINE_BROKER__OVERFLOW_POLICY=block`.
const ENV_PREFIX: &str = "PUSHLINE";

/// Loads the configuration from `config/default` and `PUSHLINE_*` environment
/// variables, then fills anything missing from `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("client.device_attribute_headers")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let broker = partial.broker;
    let client = partial.client;
    let logging = partial.logging;

    Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            max_connections: server
                .as_ref()
                .and_then(|s| s.max_connections)
                .unwrap_or(default.server.max_connections),
        },
        broker: BrokerSettings {
            outbound_queue_capacity: broker
                .as_ref()
                .and_then(|b| b.outbound_queue_capacity)
                .unwrap_or(default.broker.outbound_queue_capacity),
            overflow_policy: broker
                .as_ref()
                .and_then(|b| b.overflow_policy)
                .unwrap_or(default.broker.overflow_policy),
            enable_device_support: broker
                .as_ref()
                .and_then(|b| b.enable_device_support)
                .unwrap_or(default.broker.enable_device_support),
        },
        client: ClientSettings {
            client_header: client
                .as_ref()
                .and_then(|c| c.client_header.clone())
                .unwrap_or(default.client.client_header),
            device_header: client
                .as_ref()
                .and_then(|c| c.device_header.clone())
                .unwrap_or(default.client.device_header),
            device_attribute_headers: client
                .as_ref()
                .and_then(|c| c.device_attribute_headers.clone())
                .unwrap_or(default.client.device_attribute_headers),
        },
        logging: LoggingSettings {
            level: logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    }
}

#[cfg(test)]
mod tests;
