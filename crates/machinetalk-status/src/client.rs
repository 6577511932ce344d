//! Status subscription client
//!
//! Connects to a machine's `status` service, confirms the service is alive
//! with a ping handshake and then dispatches every container published on
//! the configured topic to the handler registered for its message type.

use crate::channel::StatusChannel;
use crate::error::{Result, StatusError};
use crate::proto::{decode_container, encode_container, Container, ContainerType};
use crate::state::ConnectionState;
use crate::zmq::ZmqStatusChannel;
use machinetalk_core::StatusSettings;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Callback invoked with each container of a registered type
pub type FrameHandler = Box<dyn FnMut(&Container) + Send>;

/// What [`StatusClient::handle_frame`] did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Passed to a registered handler
    Handled,
    /// Known type without a handler
    Unhandled,
    /// A ping from the service, acknowledged
    PingAcknowledged,
    /// Published on a topic other than the subscribed one
    OtherTopic,
    /// Message type this client does not know
    UnknownType,
    /// Payload is not a container
    Undecodable,
}

pub struct StatusClient<C: StatusChannel> {
    channel: C,
    settings: StatusSettings,
    handlers: HashMap<ContainerType, FrameHandler>,
    state: ConnectionState,
    frames_received: u64,
}

impl StatusClient<ZmqStatusChannel> {
    /// Connects to the status service at `dsn` and performs the handshake
    pub async fn connect(dsn: &str, settings: StatusSettings) -> Result<Self> {
        info!(dsn, topic = %settings.topic, "Connecting to status service");
        let channel = ZmqStatusChannel::connect(dsn, &settings.topic).await?;
        Self::with_channel(channel, settings).await
    }
}

impl<C: StatusChannel> StatusClient<C> {
    /// Wraps a channel without talking to the service yet
    pub fn new(channel: C, settings: StatusSettings) -> Self {
        Self {
            channel,
            settings,
            handlers: HashMap::new(),
            state: ConnectionState::Disconnected,
            frames_received: 0,
        }
    }

    /// Wraps a channel and performs the handshake
    pub async fn with_channel(channel: C, settings: StatusSettings) -> Result<Self> {
        let mut client = Self::new(channel, settings);
        client.handshake().await?;
        Ok(client)
    }

    /// Sends a ping and waits for its acknowledgement
    pub async fn handshake(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let result = self.ping().await;
        self.state = match result {
            Ok(()) => ConnectionState::Connected,
            Err(_) => ConnectionState::Failed,
        };
        result
    }

    async fn ping(&mut self) -> Result<()> {
        self.send(ContainerType::MtPing).await?;

        let timeout = self.settings.handshake_timeout();
        let payload = tokio::time::timeout(timeout, self.channel.recv_reply())
            .await
            .map_err(|_| StatusError::HandshakeTimeout(timeout))??;

        let reply = decode_container(&payload)?;
        match reply.message_type() {
            Some(ContainerType::MtPingAcknowledge) => {
                info!("Status service acknowledged ping");
                Ok(())
            }
            _ => {
                warn!(message_type = reply.r#type, "Unexpected handshake reply");
                Err(StatusError::UnexpectedReply(reply.r#type))
            }
        }
    }

    /// Registers `handler` for containers of `message_type`, replacing any
    /// previous handler for that type
    pub fn on<F>(&mut self, message_type: ContainerType, handler: F) -> &mut Self
    where
        F: FnMut(&Container) + Send + 'static,
    {
        self.handlers.insert(message_type, Box::new(handler));
        self
    }

    /// Sends an empty container of `message_type` as a command
    pub async fn send(&mut self, message_type: ContainerType) -> Result<()> {
        trace!(message_type = message_type.name(), "Sending command");
        self.channel
            .send_command(encode_container(&Container::new(message_type)))
            .await
    }

    /// Decodes and dispatches one subscription frame. Only failures to
    /// answer a ping are errors; bad frames are logged and skipped.
    pub async fn handle_frame(&mut self, topic: &str, payload: &[u8]) -> Result<Dispatch> {
        if topic != self.settings.topic {
            warn!(topic, expected = %self.settings.topic, "Frame on unexpected topic");
            return Ok(Dispatch::OtherTopic);
        }
        self.frames_received += 1;

        let container = match decode_container(payload) {
            Ok(container) => container,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return Ok(Dispatch::Undecodable);
            }
        };

        let Some(message_type) = container.message_type() else {
            warn!(message_type = container.r#type, "Unknown message type");
            return Ok(Dispatch::UnknownType);
        };

        if message_type == ContainerType::MtPing {
            self.send(ContainerType::MtPingAcknowledge).await?;
            return Ok(Dispatch::PingAcknowledged);
        }

        match self.handlers.get_mut(&message_type) {
            Some(handler) => {
                handler(&container);
                Ok(Dispatch::Handled)
            }
            None => {
                debug!(message_type = message_type.name(), "No handler registered");
                Ok(Dispatch::Unhandled)
            }
        }
    }

    /// Dispatches frames until `cancel` fires or the channel fails
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => None,
                frame = self.channel.recv_topic() => Some(frame),
            };

            let (topic, payload) = match frame {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!(error = %e, "Status channel failed");
                    self.state = ConnectionState::Failed;
                    return Err(e);
                }
            };

            if let Err(e) = self.handle_frame(&topic, &payload).await {
                self.state = ConnectionState::Failed;
                return Err(e);
            }
        }

        info!(frames = self.frames_received, "Status client stopped");
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Frames received on the subscribed topic
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }
}
