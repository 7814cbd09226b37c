use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::Network;

pub const ENV_PREFIX: &str = "HLKIT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HlConfig {
    pub network: NetworkSettings,
    pub connection: ConnectionSettings,
    pub symbols: SymbolCacheSettings,
    pub rest: RestSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub network: Network,
    /// Overrides the network's default REST endpoint.
    pub api_url: Option<String>,
    /// Overrides the network's default websocket endpoint.
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub max_subscriptions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolCacheSettings {
    pub refresh_interval_ms: u64,
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    pub request_timeout_ms: u64,
    /// Token bucket capacity, in request weight units.
    pub rate_limit_capacity: u32,
    /// Weight units restored per second.
    pub rate_limit_refill_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub file: Option<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            api_url: None,
            ws_url: None,
        }
    }
}

impl NetworkSettings {
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or_else(|| self.network.api_url())
    }

    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or_else(|| self.network.ws_url())
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 30_000,
            max_subscriptions: 1_000,
        }
    }
}

impl ConnectionSettings {
    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl Default for SymbolCacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 60_000,
            max_consecutive_failures: 5,
        }
    }
}

impl SymbolCacheSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            rate_limit_capacity: 1_200,
            rate_limit_refill_per_sec: 20.0,
        }
    }
}

impl RestSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl HlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        for path in paths {
            builder = builder.add_source(File::from(path.as_ref()).required(false));
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn mainnet() -> Self {
        Self::default()
    }

    pub fn testnet() -> Self {
        Self {
            network: NetworkSettings {
                network: Network::Testnet,
                ..NetworkSettings::default()
            },
            logging: LoggingSettings {
                level: "debug".to_string(),
                ..LoggingSettings::default()
            },
            ..Self::default()
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
        }
    }
}
