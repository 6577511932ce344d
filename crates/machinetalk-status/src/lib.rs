//! Machinetalk status client
//!
//! Subscribes to the task status published by a machine's `status` service.
//! Messages are protobuf [`Container`]s carried over ZeroMQ: a SUB socket
//! receives `(topic, container)` frames and a DEALER socket carries commands
//! such as the ping handshake.
//!
//! # Example
//!
//! ```no_run
//! use machinetalk_core::StatusSettings;
//! use machinetalk_status::{ContainerType, StatusClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> machinetalk_status::Result<()> {
//! let mut client = StatusClient::connect("tcp://mksocfpga.local:6502", StatusSettings::default()).await?;
//! client.on(ContainerType::MtEmcstatFullUpdate, |container| {
//!     println!("full update: {:?}", container.note);
//! });
//! client.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod error;
pub mod proto;
pub mod state;
pub mod zmq;

pub use channel::{MemoryChannel, MemoryPeer, StatusChannel};
pub use client::{Dispatch, FrameHandler, StatusClient};
pub use error::{Result, StatusError};
pub use proto::{decode_container, encode_container, Container, ContainerType};
pub use state::ConnectionState;
pub use zmq::ZmqStatusChannel;
