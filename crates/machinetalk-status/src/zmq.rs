//! ZeroMQ status channel
//!
//! Subscription messages are two frames: the topic, then the encoded
//! container. Command replies arrive on a DEALER socket as a single frame.

use crate::channel::StatusChannel;
use crate::error::{Result, StatusError};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

pub struct ZmqStatusChannel {
    subscriber: SubSocket,
    command: DealerSocket,
}

impl ZmqStatusChannel {
    /// Connects both sockets to `dsn` and subscribes to `topic`
    pub async fn connect(dsn: &str, topic: &str) -> Result<Self> {
        let mut subscriber = SubSocket::new();
        subscriber.connect(dsn).await?;
        subscriber.subscribe(topic).await?;

        let mut command = DealerSocket::new();
        command.connect(dsn).await?;

        debug!(dsn, topic, "Status sockets connected");
        Ok(Self {
            subscriber,
            command,
        })
    }
}

#[async_trait]
impl StatusChannel for ZmqStatusChannel {
    async fn recv_topic(&mut self) -> Result<(String, Bytes)> {
        let message = self.subscriber.recv().await?;

        let topic = message
            .get(0)
            .ok_or_else(|| StatusError::MalformedMessage("empty subscription message".into()))?;
        let payload = message.get(1).cloned().unwrap_or_default();

        Ok((String::from_utf8_lossy(topic).into_owned(), payload))
    }

    async fn send_command(&mut self, payload: Bytes) -> Result<()> {
        self.command.send(ZmqMessage::from(payload)).await?;
        Ok(())
    }

    async fn recv_reply(&mut self) -> Result<Bytes> {
        let message = self.command.recv().await?;
        // the payload is the last frame
        message
            .get(message.len().saturating_sub(1))
            .cloned()
            .ok_or_else(|| StatusError::MalformedMessage("empty reply".into()))
    }
}
