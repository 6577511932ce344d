//! # Machinetalk Core
//!
//! Configuration and error handling shared by the Machinetalk discovery and
//! status crates.
//!
//! - **Configuration**: [`AppConfig`] loaded from YAML files, optionally layered
//!   with `MACHINETALK__*` environment overrides, with validation.
//! - **Discovery settings**: [`DiscoveryConfig`] and the browsed [`ServiceType`]s.
//! - **Errors**: serializable error types built with `thiserror`.
//!
//! ## Example
//!
//! ```
//! use machinetalk_core::config::AppConfig;
//!
//! let config = AppConfig::from_yaml("machine_uuid: a42c8c6b-4025-4f83-ba28-dad21114744a").unwrap();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.discovery.service_types.len(), 3);
//! ```

pub mod config;
pub mod discovery_config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::{AppConfig, LogFormat, LoggingConfig, StatusSettings};
pub use discovery_config::{DiscoveryConfig, ServiceType};
pub use error::{ConfigError, MachinetalkError, Result};
