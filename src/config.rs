//! Configuration loading and validation (spec §4.9, §6).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required configuration key: {0}")]
    Missing(&'static str),
}

/// The counterparty management-plane surface and poll/timeout tuning (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct EdcConfig {
    pub endpoint: String,
    pub management: String,
    pub catalog: String,
    pub negotiation: String,
    pub transfer: String,
    pub receiver_endpoint: String,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Asset-type filter used when the registry discovery path is active.
    pub registry_asset_type: String,
}

fn default_delay_ms() -> u64 {
    200
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

impl EdcConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn catalog_url(&self) -> String {
        format!("{}{}{}", self.endpoint, self.management, self.catalog)
    }

    pub fn negotiation_url(&self) -> String {
        format!("{}{}{}", self.endpoint, self.management, self.negotiation)
    }

    pub fn transfer_url(&self) -> String {
        format!("{}{}{}", self.endpoint, self.management, self.transfer)
    }
}

/// Where the journal and process records live on disk (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub root: String,
}

/// Log output format for the ambient tracing-subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

/// Ambient server concerns: metrics endpoint and log format.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_metrics_port() -> u16 {
    9090
}

/// Top-level engine configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub edc: EdcConfig,
    pub storage: StorageConfig,
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        metrics_port: default_metrics_port(),
        log_format: LogFormat::default(),
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Validate required fields beyond what serde's `Deserialize` can express.
    ///
    /// Run once at startup; CONFIG_MISSING is fatal before any process is accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.edc.endpoint.is_empty() {
            return Err(ConfigError::Missing("edc.endpoint"));
        }
        if self.edc.management.is_empty() {
            return Err(ConfigError::Missing("edc.management"));
        }
        if self.storage.root.is_empty() {
            return Err(ConfigError::Missing("storage.root"));
        }
        Ok(())
    }
}

/// Resolve the configuration path from CLI arguments or `ENGINE_CONFIG`.
/// Falls back to `engine.toml` when neither is provided.
pub fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);
    if let Some(flag) = args.next() {
        if flag == "-c" || flag == "--config" {
            if let Some(path) = args.next() {
                return path;
            }
        } else {
            return flag;
        }
    }
    std::env::var("ENGINE_CONFIG").unwrap_or_else(|_| "engine.toml".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
        [edc]
        endpoint = "https://prov/api"
        management = "/management"
        catalog = "/v2/catalog/request"
        negotiation = "/v2/contractnegotiations"
        transfer = "/v2/transferprocesses"
        receiver_endpoint = "http://localhost:8080/callback"
        registry_asset_type = "digital-twin-registry"

        [storage]
        root = "/tmp/processes"
        "#
    }

    #[test]
    fn parses_and_validates_minimal_config() {
        let config: EngineConfig = toml::from_str(sample_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.edc.delay_ms, 200);
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(config.server.log_format, LogFormat::Pretty);
    }

    #[test]
    fn missing_endpoint_fails_validation() {
        let mut config: EngineConfig = toml::from_str(sample_toml()).unwrap();
        config.edc.endpoint.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("edc.endpoint"))));
    }

    #[test]
    fn urls_are_joined_from_endpoint_management_and_path() {
        let config: EngineConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(
            config.edc.negotiation_url(),
            "https://prov/api/management/v2/contractnegotiations"
        );
    }
}
