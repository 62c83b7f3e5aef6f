//! Configuration for the external bank gateway

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Data directory for the partner-side RocksDB
    pub data_dir: PathBuf,

    /// Poll interval of the processing loop (milliseconds)
    pub poll_interval_ms: u64,

    /// Shortest simulated partner processing time (seconds)
    pub min_processing_secs: u64,

    /// Longest simulated partner processing time (seconds)
    pub max_processing_secs: u64,

    /// Share of transfers the partner accepts (0.0 - 1.0)
    pub success_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "external-gateway".to_string(),
            data_dir: PathBuf::from("./data/external-gateway"),
            poll_interval_ms: 10_000, // 10s
            min_processing_secs: 10,
            max_processing_secs: 30,
            success_rate: 0.8,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("GATEWAY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(rate) = std::env::var("GATEWAY_SUCCESS_RATE") {
            config.success_rate = rate.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid GATEWAY_SUCCESS_RATE: {}", e))
            })?;
        }

        if let Ok(secs) = std::env::var("GATEWAY_MIN_PROCESSING_SECS") {
            config.min_processing_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid GATEWAY_MIN_PROCESSING_SECS: {}", e))
            })?;
        }

        if let Ok(secs) = std::env::var("GATEWAY_MAX_PROCESSING_SECS") {
            config.max_processing_secs = secs.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid GATEWAY_MAX_PROCESSING_SECS: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> crate::Result<()> {
        if !(0.0..=1.0).contains(&self.success_rate) {
            return Err(crate::Error::Config(format!(
                "success_rate must be within [0, 1], got {}",
                self.success_rate
            )));
        }
        if self.min_processing_secs > self.max_processing_secs {
            return Err(crate::Error::Config(format!(
                "min_processing_secs {} exceeds max_processing_secs {}",
                self.min_processing_secs, self.max_processing_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.success_rate, 0.8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_rate() {
        let config = Config {
            success_rate: 1.5,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            service_name = "partner-mock"
            data_dir = "/tmp/partner"
            poll_interval_ms = 100
            min_processing_secs = 0
            max_processing_secs = 0
            success_rate = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(config.max_processing_secs, 0);
        assert!(config.validate().is_ok());
    }
}
