mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    ClientSettings, DiscoverySettings, FlowSettings, LogSettings, ReconnectSettings, Settings,
    TransportSettings,
};


/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct with every section filled in
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("BROKERLINK")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("client.publish_topics")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    let client = partial.client;
    let reconnect = partial.reconnect;
    let transport = partial.transport;

    Ok(Settings {
        client: ClientSettings {
            group_id: client
                .as_ref()
                .and_then(|c| c.group_id.clone())
                .unwrap_or(default.client.group_id),
            secret_key: client
                .as_ref()
                .and_then(|c| c.secret_key.clone())
                .unwrap_or(default.client.secret_key),
            host_id: client
                .as_ref()
                .and_then(|c| c.host_id.clone())
                .unwrap_or(default.client.host_id),
            publish_topics: client
                .as_ref()
                .and_then(|c| c.publish_topics.clone())
                .unwrap_or(default.client.publish_topics),
        },
        reconnect: ReconnectSettings {
            enabled: reconnect
                .as_ref()
                .and_then(|r| r.enabled)
                .unwrap_or(default.reconnect.enabled),
            interval_secs: reconnect
                .as_ref()
                .and_then(|r| r.interval_secs)
                .unwrap_or(default.reconnect.interval_secs),
            max_attempts: reconnect
                .as_ref()
                .and_then(|r| r.max_attempts)
                .unwrap_or(default.reconnect.max_attempts),
        },
        transport: TransportSettings {
            dial_timeout_ms: transport
                .as_ref()
                .and_then(|t| t.dial_timeout_ms)
                .unwrap_or(default.transport.dial_timeout_ms),
            handshake_timeout_ms: transport
                .as_ref()
                .and_then(|t| t.handshake_timeout_ms)
                .unwrap_or(default.transport.handshake_timeout_ms),
            heartbeat_interval_ms: transport
                .as_ref()
                .and_then(|t| t.heartbeat_interval_ms)
                .unwrap_or(default.transport.heartbeat_interval_ms),
            heartbeat_timeout_ms: transport
                .as_ref()
                .and_then(|t| t.heartbeat_timeout_ms)
                .unwrap_or(default.transport.heartbeat_timeout_ms),
        },
        flow: FlowSettings {
            interval_secs: partial
                .flow
                .and_then(|f| f.interval_secs)
                .unwrap_or(default.flow.interval_secs),
        },
        log: LogSettings {
            level: partial
                .log
                .and_then(|l| l.level)
                .unwrap_or(default.log.level),
        },
        discovery: DiscoverySettings {
            brokers: partial
                .discovery
                .and_then(|d| d.brokers)
                .unwrap_or(default.discovery.brokers),
        },
    })
}
