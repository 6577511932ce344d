//! Types for discovered machines, in-flight resolutions and consumer events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// All machines discovered in a session, keyed by uuid
pub type MachineTable = BTreeMap<String, Machine>;

/// A machine announcing one or more Machinetalk services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// Stable machine identifier taken from the `uuid` TXT key
    pub uuid: String,

    /// Services of this machine, keyed by service name
    pub services: BTreeMap<String, MachineService>,

    /// When the first service of this machine resolved
    pub discovered_at: DateTime<Utc>,
}

impl Machine {
    /// Creates a machine without any services
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            services: BTreeMap::new(),
            discovered_at: Utc::now(),
        }
    }

    /// Looks up a service by name
    pub fn service(&self, name: &str) -> Option<&MachineService> {
        self.services.get(name)
    }

    /// Returns the DSN of the named service, e.g. `machine.dsn("status")`
    pub fn dsn(&self, name: &str) -> Option<&str> {
        self.services.get(name).map(|s| s.dsn.as_str())
    }

    /// Inserts or replaces a service, returning the previous entry
    pub(crate) fn upsert(&mut self, service: MachineService) -> Option<MachineService> {
        self.services.insert(service.name.clone(), service)
    }
}

/// A named service endpoint of a machine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineService {
    /// Service name (`status`, `command`, `error`, ...)
    pub name: String,

    /// Connection string used by the transport clients
    pub dsn: String,
}

impl MachineService {
    pub fn new(name: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dsn: dsn.into(),
        }
    }
}

/// Network interface an instance was seen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interface {
    /// Not tied to a specific interface
    Any,
    /// OS interface index
    Index(u32),
}

/// Address family an instance was seen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpProtocol {
    Unspecified,
    V4,
    V6,
}

/// Identity of an announced service instance that has not resolved yet
///
/// All six fields take part in equality, so the same instance name seen on
/// two interfaces is tracked as two pending resolutions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingResolution {
    pub interface: Interface,
    pub protocol: IpProtocol,
    /// Instance name without the service type suffix
    pub name: String,
    /// Service type, e.g. `_machinekit._tcp.local.`
    pub service_type: String,
    pub domain: String,
    pub flags: u32,
}

impl PendingResolution {
    /// Creates an identity on any interface and address family
    pub fn new(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        let service_type = service_type.into();
        Self {
            interface: Interface::Any,
            protocol: IpProtocol::Unspecified,
            name: name.into(),
            domain: domain_of(&service_type),
            service_type,
            flags: 0,
        }
    }

    /// Builds an identity from an mDNS full name such as
    /// `Status on host._machinekit._tcp.local.`
    pub fn from_fullname(service_type: &str, fullname: &str) -> Self {
        let name = fullname
            .strip_suffix(service_type)
            .map(|n| n.trim_end_matches('.'))
            .unwrap_or(fullname);
        Self::new(name, service_type)
    }

    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interface = interface;
        self
    }

    pub fn with_protocol(mut self, protocol: IpProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

impl fmt::Display for PendingResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.service_type)
    }
}

fn domain_of(service_type: &str) -> String {
    service_type
        .trim_end_matches('.')
        .rsplit('.')
        .next()
        .filter(|label| !label.is_empty() && !label.starts_with('_'))
        .unwrap_or("local")
        .to_string()
}

/// Systemic failure of a transport adapter (browse or daemon failure)
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("transport failure: {reason}")]
pub struct TransportFailure {
    /// Service type the failure relates to, when known
    pub service_type: Option<String>,
    pub reason: String,
}

impl TransportFailure {
    pub fn new(service_type: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            service_type,
            reason: reason.into(),
        }
    }
}

/// Event delivered to discovery consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// First service of a previously unseen machine resolved
    MachineDiscovered { machine: Machine },

    /// A service of a machine resolved (new or replaced)
    ServiceDiscovered {
        machine: Machine,
        service: MachineService,
    },

    /// Every browsed type finished its initial sweep and nothing is pending
    InitialDiscoveryFinished { machines: MachineTable },

    /// The transport reported a systemic failure
    Failure { error: TransportFailure },
}

impl DiscoveryEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryEvent::MachineDiscovered { .. } => "machine_discovered",
            DiscoveryEvent::ServiceDiscovered { .. } => "service_discovered",
            DiscoveryEvent::InitialDiscoveryFinished { .. } => "initial_discovery_finished",
            DiscoveryEvent::Failure { .. } => "failure",
        }
    }
}
