//! Message channel to a status service
//!
//! A status service publishes containers on a topic and answers commands on
//! a separate request socket. [`StatusChannel`] is that pair of endpoints;
//! [`ZmqStatusChannel`](crate::zmq::ZmqStatusChannel) speaks ZeroMQ and
//! [`MemoryChannel`] is an in-process stand-in.

use crate::error::{Result, StatusError};
use crate::proto::{decode_container, encode_container, Container};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

#[async_trait]
pub trait StatusChannel: Send {
    /// Next `(topic, payload)` pair from the subscription
    async fn recv_topic(&mut self) -> Result<(String, Bytes)>;

    /// Sends a command payload
    async fn send_command(&mut self, payload: Bytes) -> Result<()>;

    /// Next reply to a command
    async fn recv_reply(&mut self) -> Result<Bytes>;
}

#[async_trait]
impl<C: StatusChannel + ?Sized> StatusChannel for Box<C> {
    async fn recv_topic(&mut self) -> Result<(String, Bytes)> {
        (**self).recv_topic().await
    }

    async fn send_command(&mut self, payload: Bytes) -> Result<()> {
        (**self).send_command(payload).await
    }

    async fn recv_reply(&mut self) -> Result<Bytes> {
        (**self).recv_reply().await
    }
}

/// In-process channel driven by a [`MemoryPeer`]
pub struct MemoryChannel {
    topics: mpsc::UnboundedReceiver<(String, Bytes)>,
    commands: mpsc::UnboundedSender<Bytes>,
    replies: mpsc::UnboundedReceiver<Bytes>,
}

/// The service side of a [`MemoryChannel`]
pub struct MemoryPeer {
    topics: mpsc::UnboundedSender<(String, Bytes)>,
    commands: mpsc::UnboundedReceiver<Bytes>,
    replies: mpsc::UnboundedSender<Bytes>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, MemoryPeer) {
        let (topic_tx, topic_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let channel = MemoryChannel {
            topics: topic_rx,
            commands: command_tx,
            replies: reply_rx,
        };
        let peer = MemoryPeer {
            topics: topic_tx,
            commands: command_rx,
            replies: reply_tx,
        };
        (channel, peer)
    }
}

#[async_trait]
impl StatusChannel for MemoryChannel {
    async fn recv_topic(&mut self) -> Result<(String, Bytes)> {
        self.topics.recv().await.ok_or(StatusError::Closed)
    }

    async fn send_command(&mut self, payload: Bytes) -> Result<()> {
        self.commands.send(payload).map_err(|_| StatusError::Closed)
    }

    async fn recv_reply(&mut self) -> Result<Bytes> {
        self.replies.recv().await.ok_or(StatusError::Closed)
    }
}

impl MemoryPeer {
    /// Publishes a container on `topic`
    pub fn publish(&self, topic: &str, container: &Container) -> bool {
        self.publish_raw(topic, encode_container(container))
    }

    pub fn publish_raw(&self, topic: &str, payload: Bytes) -> bool {
        self.topics.send((topic.to_string(), payload)).is_ok()
    }

    /// Answers the next command
    pub fn reply(&self, container: &Container) -> bool {
        self.replies.send(encode_container(container)).is_ok()
    }

    /// Waits for the next command sent by the client
    pub async fn next_command(&mut self) -> Option<Container> {
        let payload = self.commands.recv().await?;
        decode_container(&payload).ok()
    }

    /// The next command already sent by the client, if any
    pub fn try_next_command(&mut self) -> Option<Container> {
        let payload = self.commands.try_recv().ok()?;
        decode_container(&payload).ok()
    }
}
