pub mod store;
pub use store::{ConfigChange, ConfigStore, ConfigWatcher, WatchId};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Re-export component config types
pub use crate::gateway::GatewayConfig;

#[cfg(test)]
mod tests;

/// One config layer: a flat key → JSON value map.
pub type ConfigMap = Map<String, Value>;

/// Complete core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Initial contents of the system config layer
    #[serde(default)]
    pub system: ConfigMap,
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Required bearer token for /api/admin. None = admin API unrestricted.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Largest request body accepted by the transport
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    1_048_576 // 1 MiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_token: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Retained history size; oldest events are evicted first
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

fn default_max_events() -> usize {
    crate::event::DEFAULT_MAX_EVENTS
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

/// Storage collaborator selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. None = in-memory storage.
    #[serde(default)]
    pub sqlite_path: Option<String>,
}

impl CoreConfig {
    /// Apply `MODCORE_*` environment overrides on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("MODCORE_BIND") {
            self.server.bind = v;
        }
        if let Ok(v) = std::env::var("MODCORE_ADMIN_TOKEN") {
            if !v.is_empty() {
                self.server.admin_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("MODCORE_MAX_BODY_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                self.server.max_body_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("MODCORE_MAX_EVENTS") {
            if let Ok(n) = v.parse::<usize>() {
                self.events.max_events = n;
            }
        }
        if let Ok(v) = std::env::var("MODCORE_RATE_LIMIT_WINDOW_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.gateway.rate_limit_window_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("MODCORE_SQLITE_PATH") {
            self.storage.sqlite_path = Some(v);
        }
        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<CoreConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: CoreConfig =
        toml::from_str(&contents).with_context(|| format!("Invalid config file '{}'", path))?;
    Ok(config)
}
