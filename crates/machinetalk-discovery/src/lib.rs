//! mDNS discovery of Machinetalk machines
//!
//! Machinekit instances announce each of their services (status, command,
//! error, ...) as a DNS-SD instance whose TXT record carries the machine
//! `uuid`, the service name and its `dsn`. This crate:
//! - Browses the Machinekit and Webtalk service types
//! - Tracks announced instances until they resolve
//! - Aggregates resolved services per machine
//! - Signals once everything visible at startup has been enumerated and resolved
//!
//! # Architecture
//!
//! - [`transport`]: the [`Transport`] capability set (browse, resolve) and the
//!   [`TransportEvent`]s adapters deliver through an [`EventSink`]
//! - [`mdns`]: the `mdns-sd` adapter
//! - [`txt`]: TXT record parsing and required-key validation
//! - [`engine`]: the discovery state machine
//! - [`service`]: a session task owning the engine; consumer events are
//!   delivered over a channel or to a [`DiscoveryHandler`]
//!
//! # Example
//!
//! ```no_run
//! use machinetalk_discovery::{DiscoveryConfig, DiscoveryService, MdnsTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DiscoveryConfig::default();
//!     let service = DiscoveryService::new(config.clone())?;
//!
//!     let transport = MdnsTransport::new(service.event_sink(), config.settle_period())?;
//!     service.start(transport).await?;
//!
//!     let machines = service.initial_discovery().await?;
//!     for (uuid, machine) in &machines {
//!         println!("{uuid}: {:?}", machine.dsn("status"));
//!     }
//!
//!     service.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod mdns;
pub mod service;
pub mod transport;
pub mod txt;
pub mod types;

pub use config::{DiscoveryConfig, ServiceType};
pub use engine::DiscoveryEngine;
pub use error::{DiscoveryError, Result};
pub use mdns::MdnsTransport;
pub use service::{DiscoveryHandler, DiscoveryService};
pub use transport::{EventSink, RecordingTransport, Resolution, Transport, TransportEvent};
pub use txt::{ServiceRecord, TxtRecord};
pub use types::{
    DiscoveryEvent, Interface, IpProtocol, Machine, MachineService, MachineTable,
    PendingResolution, TransportFailure,
};
