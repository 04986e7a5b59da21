use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Covers the broadcast server, the status broadcast engine and the
/// reconnecting client.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broadcast: BroadcastSettings,
    pub client: ClientSettings,
}

/// Where the WebSocket server listens and how it logs.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Only handshakes on this path are upgraded.
    pub ws_path: String,
    pub log_level: String,
}

/// Tuning knobs for the per-temple status broadcast.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BroadcastSettings {
    pub update_interval_ms: u64,
    /// Topic used when a handshake carries no `topicId`.
    pub default_topic: String,
    /// Chance that a periodic snapshot carries a random alert.
    pub alert_probability: f64,
    pub max_connections: usize,
}

/// Settings for `ClientConnector`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClientSettings {
    /// Endpoint URL without the `topicId` query.
    pub url: String,
    pub reconnect_interval_ms: u64,
    pub alert_history: usize,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broadcast: Option<PartialBroadcastSettings>,
    pub client: Option<PartialClientSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ws_path: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBroadcastSettings {
    pub update_interval_ms: Option<u64>,
    pub default_topic: Option<String>,
    pub alert_probability: Option<f64>,
    pub max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialClientSettings {
    pub url: Option<String>,
    pub reconnect_interval_ms: Option<u64>,
    pub alert_history: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                ws_path: "/ws".to_string(),
                log_level: "info".to_string(),
            },
            broadcast: BroadcastSettings {
                update_interval_ms: 3000,
                default_topic: "dwarka".to_string(),
                alert_probability: 0.1,
                max_connections: 1000,
            },
            client: ClientSettings {
                url: "ws://127.0.0.1:8080/ws".to_string(),
                reconnect_interval_ms: 5000,
                alert_history: 20,
            },
        }
    }
}

impl PartialSettings {
    /// Overlay the values present here on top of `base`.
    pub fn merge_onto(self, base: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broadcast = self.broadcast.unwrap_or_default();
        let client = self.client.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(base.server.host),
                port: server.port.unwrap_or(base.server.port),
                ws_path: server.ws_path.unwrap_or(base.server.ws_path),
                log_level: server.log_level.unwrap_or(base.server.log_level),
            },
            broadcast: BroadcastSettings {
                update_interval_ms: broadcast
                    .update_interval_ms
                    .unwrap_or(base.broadcast.update_interval_ms),
                default_topic: broadcast
                    .default_topic
                    .unwrap_or(base.broadcast.default_topic),
                alert_probability: broadcast
                    .alert_probability
                    .unwrap_or(base.broadcast.alert_probability),
                max_connections: broadcast
                    .max_connections
                    .unwrap_or(base.broadcast.max_connections),
            },
            client: ClientSettings {
                url: client.url.unwrap_or(base.client.url),
                reconnect_interval_ms: client
                    .reconnect_interval_ms
                    .unwrap_or(base.client.reconnect_interval_ms),
                alert_history: client.alert_history.unwrap_or(base.client.alert_history),
            },
        }
    }
}
