//! Configuration management for the Machinetalk discovery client.
//!
//! This module provides the application configuration:
//! - Loading from YAML files
//! - Environment variable overrides (`MACHINETALK__*`)
//! - Validation of all settings
//! - Logging, discovery, and status client settings

use crate::discovery_config::DiscoveryConfig;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use machinetalk_core::config::AppConfig;
///
/// // Load from file
/// let config = AppConfig::from_file("machinetalk.yaml").unwrap();
///
/// // Validate before use
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Machine whose status service should be followed once discovered
    #[serde(default)]
    pub machine_uuid: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Status client configuration
    #[serde(default)]
    pub status: StatusSettings,
}

impl AppConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate, layering
    /// `MACHINETALK__SECTION__KEY` environment variables over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or merged.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("MACHINETALK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self) -> Result<()> {
        if let Some(uuid) = &self.machine_uuid {
            if uuid.trim().is_empty() {
                return Err(ConfigError::invalid_value("machine_uuid", "cannot be empty").into());
            }
        }

        self.logging.parse_level()?;

        self.discovery
            .validate()
            .map_err(|reason| ConfigError::validation_failed(format!("discovery: {}", reason)))?;

        self.status.validate()?;

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Whether to include file/line info
    #[serde(default)]
    pub file_line: bool,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            file_line: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }

    /// Builds an env-filter directive string, e.g. `info,machinetalk_discovery=debug`.
    pub fn filter_directives(&self) -> String {
        let mut modules: Vec<_> = self.module_levels.iter().collect();
        modules.sort();

        let mut directives = self.level.clone();
        for (module, level) in modules {
            directives.push_str(&format!(",{}={}", module, level));
        }
        directives
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

/// Status client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSettings {
    /// Subscription topic carrying task status frames
    #[serde(default = "default_status_topic")]
    pub topic: String,

    /// How long to wait for the ping acknowledgement after connecting (milliseconds)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

fn default_status_topic() -> String {
    "task".to_string()
}

fn default_handshake_timeout() -> u64 {
    3000
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            topic: default_status_topic(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl StatusSettings {
    /// Returns the handshake timeout as a Duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Validates the status settings.
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(ConfigError::invalid_value("status.topic", "cannot be empty").into());
        }
        if self.handshake_timeout_ms == 0 {
            return Err(
                ConfigError::invalid_value("status.handshake_timeout_ms", "cannot be 0").into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery_config::ServiceType;
    use crate::error::MachinetalkError;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.machine_uuid.is_none());
        assert!(config.discovery.enabled);
        assert_eq!(config.status.topic, "task");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
machine_uuid: a42c8c6b-4025-4f83-ba28-dad21114744a

logging:
  level: debug
  format: json
  module_levels:
    machinetalk_discovery: trace

discovery:
  service_types:
    - machinekit
    - _ssh._tcp
  settle_period_ms: 500
  resolve_timeout_secs: 0

status:
  handshake_timeout_ms: 1500
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.machine_uuid.as_deref(),
            Some("a42c8c6b-4025-4f83-ba28-dad21114744a")
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.discovery.service_types,
            vec![
                ServiceType::Machinekit,
                ServiceType::Custom("_ssh._tcp".to_string())
            ]
        );
        assert_eq!(config.discovery.settle_period_ms, 500);
        assert!(config.discovery.resolve_timeout().is_none());
        assert_eq!(config.status.topic, "task");
        assert_eq!(config.status.handshake_timeout(), Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_discovery_validation_surfaces() {
        let yaml = "discovery:\n  service_types: []\n";
        let config = AppConfig::from_yaml(yaml).unwrap();
        match config.validate() {
            Err(MachinetalkError::Config(ConfigError::ValidationFailed { reason })) => {
                assert!(reason.starts_with("discovery:"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(AppConfig::from_yaml("discovery: [not, a, map]").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::from_file("/nonexistent/machinetalk.yaml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_validation_rejects_empty_uuid() {
        let config = AppConfig {
            machine_uuid: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_logging_parse_level() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert!(logging.parse_level().is_ok());

        let invalid = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(invalid.parse_level().is_err());
    }

    #[test]
    fn test_filter_directives() {
        let mut logging = LoggingConfig::default();
        logging
            .module_levels
            .insert("machinetalk_status".to_string(), "trace".to_string());
        logging
            .module_levels
            .insert("machinetalk_discovery".to_string(), "debug".to_string());
        assert_eq!(
            logging.filter_directives(),
            "info,machinetalk_discovery=debug,machinetalk_status=trace"
        );
    }
}
