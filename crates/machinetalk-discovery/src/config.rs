//! Configuration types for machine discovery
//!
//! Re-exports configuration from machinetalk-core to avoid circular dependencies

pub use machinetalk_core::discovery_config::{DiscoveryConfig, ServiceType};
