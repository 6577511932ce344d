//! Error types for the discovery service

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur during machine discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// mDNS service daemon failed to initialize
    #[error("Failed to initialize mDNS daemon: {0}")]
    MdnsInitFailed(String),

    /// Failed to browse for services
    #[error("Failed to browse for service type '{service_type}': {reason}")]
    BrowseFailed { service_type: String, reason: String },

    /// Service resolution could not be started
    #[error("Failed to resolve service '{service_name}': {reason}")]
    ResolutionFailed {
        service_name: String,
        reason: String,
    },

    /// Invalid discovery configuration
    #[error("Invalid discovery configuration: {0}")]
    InvalidConfig(String),

    /// Discovery session already started
    #[error("Discovery session is already running")]
    AlreadyStarted,

    /// The session ended before the requested result was available
    #[error("Discovery session closed")]
    SessionClosed,

    /// Internal error
    #[error("Internal discovery error: {0}")]
    Internal(String),
}
