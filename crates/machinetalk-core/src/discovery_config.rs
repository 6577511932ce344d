//! Configuration types for machine discovery

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the mDNS machine discovery session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Enable automatic machine discovery
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Service types to browse at startup
    #[serde(default = "default_service_types")]
    pub service_types: Vec<ServiceType>,

    /// Quiet period after which a browse cycle is considered exhausted (milliseconds)
    #[serde(default = "default_settle_period")]
    pub settle_period_ms: u64,

    /// How long an announced instance may stay unresolved before it is
    /// dropped (seconds, 0 disables expiry)
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,

    /// How often pending resolutions are checked for expiry (milliseconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Capacity of the consumer event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            service_types: default_service_types(),
            settle_period_ms: default_settle_period(),
            resolve_timeout_secs: default_resolve_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns the settle period as a Duration
    pub fn settle_period(&self) -> Duration {
        Duration::from_millis(self.settle_period_ms)
    }

    /// Returns the resolve timeout, or `None` when expiry is disabled
    pub fn resolve_timeout(&self) -> Option<Duration> {
        (self.resolve_timeout_secs > 0).then(|| Duration::from_secs(self.resolve_timeout_secs))
    }

    /// Returns the pending sweep interval as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Returns the service type strings to browse, deduplicated, in order
    pub fn service_strings(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.service_types.len());
        for ty in &self.service_types {
            let s = ty.to_service_string();
            if !out.contains(&s) {
                out.push(s);
            }
        }
        out
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.service_types.is_empty() {
            return Err("at least one service type must be configured".to_string());
        }

        if self.settle_period_ms == 0 {
            return Err("settle_period_ms cannot be 0".to_string());
        }

        if self.resolve_timeout_secs > 0 && self.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms cannot be 0 when resolve_timeout_secs is set".to_string());
        }

        if self.event_buffer == 0 {
            return Err("event_buffer cannot be 0".to_string());
        }

        Ok(())
    }
}

/// Service categories browsed for machine services
///
/// Written in configuration as a plain string: `machinekit`, `http`, `https`,
/// or any other mDNS service type such as `_ssh._tcp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceType {
    /// Machinekit services (status, command, error, ...)
    /// Typical service: _machinekit._tcp.local
    Machinekit,

    /// Webtalk server announcing over plain HTTP
    /// Typical service: _http._tcp.local
    Http,

    /// Webtalk server announcing over HTTPS
    /// Typical service: _https._tcp.local
    Https,

    /// Custom service type
    Custom(String),
}

impl ServiceType {
    /// Returns the mDNS service type string
    pub fn to_service_string(&self) -> String {
        match self {
            ServiceType::Machinekit => "_machinekit._tcp.local.".to_string(),
            ServiceType::Http => "_http._tcp.local.".to_string(),
            ServiceType::Https => "_https._tcp.local.".to_string(),
            ServiceType::Custom(s) => {
                if s.ends_with('.') {
                    s.clone()
                } else if s.ends_with(".local") {
                    format!("{}.", s)
                } else {
                    format!("{}.local.", s)
                }
            }
        }
    }

    /// Creates a ServiceType from an mDNS service string
    pub fn from_service_string(s: &str) -> Self {
        let normalized = s.trim_end_matches('.');
        match normalized {
            "_machinekit._tcp.local" => ServiceType::Machinekit,
            "_http._tcp.local" => ServiceType::Http,
            "_https._tcp.local" => ServiceType::Https,
            _ => ServiceType::Custom(s.to_string()),
        }
    }

    /// Returns a human-readable description
    pub fn description(&self) -> &str {
        match self {
            ServiceType::Machinekit => "Machinekit service",
            ServiceType::Http => "Webtalk (HTTP)",
            ServiceType::Https => "Webtalk (HTTPS)",
            ServiceType::Custom(_) => "Custom service",
        }
    }
}

impl From<String> for ServiceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "machinekit" => ServiceType::Machinekit,
            "http" => ServiceType::Http,
            "https" => ServiceType::Https,
            _ => ServiceType::from_service_string(&s),
        }
    }
}

impl From<ServiceType> for String {
    fn from(ty: ServiceType) -> Self {
        match ty {
            ServiceType::Machinekit => "machinekit".to_string(),
            ServiceType::Http => "http".to_string(),
            ServiceType::Https => "https".to_string(),
            ServiceType::Custom(s) => s,
        }
    }
}

// Default configuration values
fn default_enabled() -> bool {
    true
}

fn default_service_types() -> Vec<ServiceType> {
    vec![ServiceType::Machinekit, ServiceType::Http, ServiceType::Https]
}

fn default_settle_period() -> u64 {
    2000
}

fn default_resolve_timeout() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    500
}

fn default_event_buffer() -> usize {
    1000
}
