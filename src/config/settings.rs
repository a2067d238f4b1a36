use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub requester: RequesterSettings,
}

/// Address the WebSocket front end binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Idle-topic reclamation.
///
/// Every `reap_interval_secs` the broker drops topics that have had no
/// subscribers and no activity for `idle_timeout_secs`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub reap_interval_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Identity of this requester instance; together they name its reply topic.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RequesterSettings {
    pub app_name: String,
    pub instance_id: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub requester: Option<PartialRequesterSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub reap_interval_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRequesterSettings {
    pub app_name: Option<String>,
    pub instance_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broker: BrokerSettings {
                reap_interval_secs: 60,
                idle_timeout_secs: 600,
            },
            requester: RequesterSettings::default(),
        }
    }
}

impl Default for RequesterSettings {
    fn default() -> Self {
        Self {
            app_name: "spreadbus".to_string(),
            instance_id: "1".to_string(),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server;
        let broker = self.broker;
        let requester = self.requester;

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
            },
            broker: BrokerSettings {
                reap_interval_secs: broker
                    .as_ref()
                    .and_then(|b| b.reap_interval_secs)
                    .unwrap_or(default.broker.reap_interval_secs),
                idle_timeout_secs: broker
                    .as_ref()
                    .and_then(|b| b.idle_timeout_secs)
                    .unwrap_or(default.broker.idle_timeout_secs),
            },
            requester: RequesterSettings {
                app_name: requester
                    .as_ref()
                    .and_then(|r| r.app_name.clone())
                    .unwrap_or(default.requester.app_name),
                instance_id: requester
                    .as_ref()
                    .and_then(|r| r.instance_id.clone())
                    .unwrap_or(default.requester.instance_id),
            },
        }
    }
}
