//! Configuration management with validation and defaults
//!
//! The gateway is configured from a single TOML file. Every section has
//! defaults so a file only needs to list the organizations it serves.

use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Top-level gateway configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub events: EventConfig,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub monitoring: MonitoringConfig,
    pub organizations: Vec<OrganizationConfig>,
}

/// HTTP listener settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            // Lifecycle calls retry with backoff, so this is generous.
            request_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Request signature settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Maximum age of a signed request in seconds
    pub max_request_age_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_request_age_secs: 120,
        }
    }
}

/// Chaincode event wait and webhook delivery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub wait_timeout_secs: u64,
    pub webhook_timeout_secs: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 20,
            webhook_timeout_secs: 10,
        }
    }
}

/// Block record store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/block_records".to_string(),
        }
    }
}

/// Ledger network backend selection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetworkMode {
    /// In-process simulated ledger, for development and tests
    Simulated,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mode: NetworkMode,
    /// Root under which chaincode sources live (`<root>/src/<chaincode path>`)
    pub chaincode_root: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: NetworkMode::Simulated,
            chaincode_root: std::env::var("GOPATH").unwrap_or_else(|_| "./chaincode".to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// `tracing` env-filter directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "ledger_gateway=info,tower_http=info".to_string(),
        }
    }
}

/// One organization served by this gateway
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrganizationConfig {
    pub org_name: String,
    pub org_admin: String,
    /// Ordering service endpoint used for channel operations
    pub orderer_org_name: String,
    pub org_msp_id: String,
    /// Network SDK connection profile
    #[serde(default)]
    pub sdk_config_path: String,
    /// Channel creation transaction
    #[serde(default)]
    pub channel_config_path: String,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigValidationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigValidationError::LoadFailed(format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigValidationError> {
        let config: GatewayConfig =
            toml::from_str(raw).map_err(|e| ConfigValidationError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.organizations.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "at least one [[organizations]] entry".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for org in &self.organizations {
            if org.org_name.is_empty() {
                return Err(ConfigValidationError::MissingRequired("org_name".to_string()));
            }
            if org.org_admin.is_empty() {
                return Err(ConfigValidationError::MissingRequired(format!(
                    "org_admin for {}",
                    org.org_name
                )));
            }
            if org.org_msp_id.is_empty() {
                return Err(ConfigValidationError::MissingRequired(format!(
                    "org_msp_id for {}",
                    org.org_name
                )));
            }
            if !seen.insert(org.org_name.as_str()) {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "organization {} listed twice",
                    org.org_name
                )));
            }
        }

        if self.auth.max_request_age_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "max_request_age_secs must be > 0".to_string(),
            ));
        }

        if self.events.wait_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "wait_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn event_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.events.wait_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.events.webhook_timeout_secs)
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 9090

        [[organizations]]
        org_name = "Org1"
        org_admin = "Admin"
        orderer_org_name = "orderer.example.com"
        org_msp_id = "Org1MSP"
        channel_config_path = "./channel-artifacts/channel.tx"
    "#;

    #[test]
    fn test_parse_sample_with_defaults() {
        let config = GatewayConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.auth.max_request_age_secs, 120);
        assert_eq!(config.event_wait_timeout(), Duration::from_secs(20));
        assert_eq!(config.server.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.organizations.len(), 1);
        assert_eq!(config.organizations[0].org_msp_id, "Org1MSP");
        assert_eq!(config.network.mode, NetworkMode::Simulated);
    }

    #[test]
    fn test_default_config_requires_organizations() {
        let config = GatewayConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_duplicate_organization_rejected() {
        let mut config = GatewayConfig::from_toml_str(SAMPLE).unwrap();
        let dup = config.organizations[0].clone();
        config.organizations.push(dup);
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_zero_wait_timeout_rejected() {
        let mut config = GatewayConfig::from_toml_str(SAMPLE).unwrap();
        config.events.wait_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = GatewayConfig::load("/nonexistent/gateway.toml").unwrap_err();
        assert!(matches!(err, ConfigValidationError::LoadFailed(_)));
    }
}
