//! Hub configuration
//!
//! Priority (highest to lowest):
//! 1. Environment variables prefixed with `ALFEN_`
//! 2. TOML configuration file
//! 3. Default values

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_NAME: &str = "alfen";
pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_STATION_ADDRESS: u8 = 200;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Connection and polling settings of one station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Unit id of the station level registers.
    pub station_address: u8,
    /// Seconds between two poll cycles.
    pub scan_interval: u64,
    pub read_scn: bool,
    pub read_socket_2: bool,
    /// Seconds before a connect, read or write is abandoned.
    pub timeout: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            host: String::new(),
            port: DEFAULT_PORT,
            station_address: DEFAULT_STATION_ADDRESS,
            scan_interval: DEFAULT_SCAN_INTERVAL_SECS,
            read_scn: false,
            read_socket_2: false,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl HubConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Load from defaults, an optional TOML file and `ALFEN_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::extract(Self::figment(path))
    }

    /// Providers of [`HubConfig::load`], for callers merging their own overrides on top.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(HubConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("ALFEN_"))
    }

    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: HubConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if self.scan_interval == 0 {
            return Err(ConfigError::Invalid(
                "scan_interval must be at least 1 second".to_string(),
            ));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid(
                "timeout must be at least 1 second".to_string(),
            ));
        }
        if !(1..=247).contains(&self.station_address) {
            return Err(ConfigError::Invalid(format!(
                "station_address {} outside of 1..=247",
                self.station_address
            )));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Seconds of max-current validity below which refresh subscribers are asked to re-send it.
    pub fn refresh_threshold(&self) -> i64 {
        i64::try_from(self.scan_interval)
            .unwrap_or(i64::MAX)
            .saturating_add(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::new("192.168.1.50");
        assert_eq!(config.name, "alfen");
        assert_eq!(config.port, 502);
        assert_eq!(config.station_address, 200);
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert!(!config.read_scn);
        assert!(!config.read_socket_2);
        assert_eq!(config.refresh_threshold(), 40);
        config.validate().unwrap();
    }

    #[test]
    fn test_extract_from_toml() {
        let figment = Figment::from(Serialized::defaults(HubConfig::default())).merge(
            Toml::string(
                r#"
                host = "charger.local"
                scan_interval = 10
                read_socket_2 = true
                "#,
            ),
        );
        let config = HubConfig::extract(figment).unwrap();
        assert_eq!(config.host, "charger.local");
        assert_eq!(config.scan_interval, 10);
        assert!(config.read_socket_2);
        assert_eq!(config.station_address, 200);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            HubConfig::default().validate(),
            Err(ConfigError::Invalid(_))
        ));

        let config = HubConfig {
            scan_interval: 0,
            ..HubConfig::new("charger.local")
        };
        assert!(config.validate().is_err());

        let config = HubConfig {
            station_address: 0,
            ..HubConfig::new("charger.local")
        };
        assert!(config.validate().is_err());

        let figment = Figment::from(Serialized::defaults(HubConfig::default()))
            .merge(Toml::string("host = \"x\"\nport = \"not a port\""));
        assert!(matches!(
            HubConfig::extract(figment),
            Err(ConfigError::Load(_))
        ));
    }
}
