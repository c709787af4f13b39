use std::collections::HashMap;

use serde::Deserialize;

/// Top-level configuration settings for a `brokerlink` client.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub client: ClientSettings,
    pub reconnect: ReconnectSettings,
    pub transport: TransportSettings,
    pub flow: FlowSettings,
    pub log: LogSettings,
    pub discovery: DiscoverySettings,
}

/// Identity of the local client and the topics it publishes to.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub group_id: String,
    pub secret_key: String,
    /// Host identity published under the topic interest node.
    pub host_id: String,
    pub publish_topics: Vec<String>,
}

/// Bounded-retry policy for dead broker connections.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportSettings {
    pub dial_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Pause between two heartbeat rounds over the pooled connections.
    pub heartbeat_interval_ms: u64,
    /// A heartbeat left unanswered this long closes the session.
    pub heartbeat_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlowSettings {
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Static broker lists served by the in-process discovery registry.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiscoverySettings {
    pub brokers: HashMap<String, Vec<String>>,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub client: Option<PartialClientSettings>,
    pub reconnect: Option<PartialReconnectSettings>,
    pub transport: Option<PartialTransportSettings>,
    pub flow: Option<PartialFlowSettings>,
    pub log: Option<PartialLogSettings>,
    pub discovery: Option<PartialDiscoverySettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub group_id: Option<String>,
    pub secret_key: Option<String>,
    pub host_id: Option<String>,
    pub publish_topics: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialReconnectSettings {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PartialTransportSettings {
    pub dial_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialFlowSettings {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDiscoverySettings {
    pub brokers: Option<HashMap<String, Vec<String>>>,
}

/// Provides default values for `Settings`.
///
/// Reconnection defaults to 100 attempts spaced 30 seconds apart. Heartbeats
/// go out every two seconds and wait one second for the answer.
impl Default for Settings {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                group_id: "default-group".to_string(),
                secret_key: String::new(),
                host_id: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
                publish_topics: Vec::new(),
            },
            reconnect: ReconnectSettings {
                enabled: true,
                interval_secs: 30,
                max_attempts: 100,
            },
            transport: TransportSettings {
                dial_timeout_ms: 3000,
                handshake_timeout_ms: 5000,
                heartbeat_interval_ms: 2000,
                heartbeat_timeout_ms: 1000,
            },
            flow: FlowSettings { interval_secs: 1 },
            log: LogSettings {
                level: "info".to_string(),
            },
            discovery: DiscoverySettings::default(),
        }
    }
}
