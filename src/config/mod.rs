use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// Re-export existing config types
pub use crate::bus::MqttConfig;

use crate::bus::ReconnectPolicy;
use crate::dispatcher::DEFAULT_HISTORY_CAPACITY;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "HOMEFLUX_CONFIG";

/// Complete hub configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Topic layout
#[derive(Debug, Clone, Deserialize)]
pub struct TopicsConfig {
    /// First segment of every state and command topic
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Device type -> command topic segment, e.g. `plug = "switch"`
    #[serde(default)]
    pub device_mappings: HashMap<String, String>,
}

fn default_namespace() -> String {
    std::env::var("MQTT_BASE_TOPIC").unwrap_or_else(|_| "home".to_string())
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            device_mappings: HashMap::new(),
        }
    }
}

/// Reconnect backoff for the ingestion loop
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_transport_retry_secs")]
    pub transport_retry_secs: u64,
    #[serde(default = "default_unexpected_retry_secs")]
    pub unexpected_retry_secs: u64,
}

fn default_transport_retry_secs() -> u64 {
    5
}

fn default_unexpected_retry_secs() -> u64 {
    10
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            transport_retry_secs: default_transport_retry_secs(),
            unexpected_retry_secs: default_unexpected_retry_secs(),
        }
    }
}

impl IngestionConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::fixed_tiers(
            Duration::from_secs(self.transport_retry_secs),
            Duration::from_secs(self.unexpected_retry_secs),
        )
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Execution records kept before the oldest is evicted
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_history_capacity() -> usize {
    std::env::var("MAX_EXECUTION_HISTORY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_HISTORY_CAPACITY)
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Default page size for `GET /executions`
    #[serde(default = "default_history_limit")]
    pub default_history_limit: usize,
}

fn default_api_host() -> String {
    std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_api_port() -> u16 {
    std::env::var("API_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

fn default_history_limit() -> usize {
    50
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            default_history_limit: default_history_limit(),
        }
    }
}

impl ApiConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<HubConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: HubConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to defaults
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<HubConfig> {
    let path = path.as_ref();
    if path.exists() {
        load_config(path)
    } else {
        Ok(HubConfig::default())
    }
}
