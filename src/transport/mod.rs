//! Transport module - the pluggable byte-moving collaborator.
//!
//! The session core never touches sockets directly: it talks to a
//! [`Transport`] through a [`SharedTransport`] handle. The handle is
//! swappable at runtime, which is what a reconnection collaborator uses to
//! install a fresh connection while in-flight producer sends keep retrying.

mod memory;
mod tcp;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::{ClientError, Result};
use crate::protocol::{Command, MessageMetadata};

pub use memory::{MemoryTransport, SentCommand};
pub use tcp::TcpTransport;

/// A connected transport to one broker node.
///
/// Implementations publish every decoded inbound frame onto the session's
/// event bus; the send methods only move bytes and surface synchronous
/// failures.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a payload-free command.
    async fn send_simple(&self, command: Command) -> Result<()>;

    /// Send a payload command with one message.
    async fn send_payload(
        &self,
        command: Command,
        metadata: MessageMetadata,
        payload: Bytes,
    ) -> Result<()>;

    /// Send a payload command carrying a batch of messages.
    async fn send_payload_batch(
        &self,
        command: Command,
        metadata: MessageMetadata,
        payloads: Vec<Bytes>,
    ) -> Result<()>;
}

/// Cheaply cloneable, swappable handle to the session's active transport.
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<RwLock<Option<Arc<dyn Transport>>>>,
}

impl SharedTransport {
    /// Create a handle with no transport installed yet.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a handle around an already connected transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(transport))),
        }
    }

    /// Install a fresh transport, replacing the previous one.
    ///
    /// In-flight producer retries pick the new transport up on their next
    /// attempt.
    pub async fn replace(&self, transport: Arc<dyn Transport>) {
        *self.inner.write().await = Some(transport);
    }

    /// Whether a transport is currently installed.
    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.is_some()
    }

    async fn current(&self) -> Result<Arc<dyn Transport>> {
        self.inner
            .read()
            .await
            .clone()
            .ok_or_else(|| ClientError::Connection("no transport installed".into()))
    }

    /// Send a payload-free command through the active transport.
    pub async fn send_simple(&self, command: Command) -> Result<()> {
        self.current().await?.send_simple(command).await
    }

    /// Send a payload command through the active transport.
    pub async fn send_payload(
        &self,
        command: Command,
        metadata: MessageMetadata,
        payload: Bytes,
    ) -> Result<()> {
        self.current()
            .await?
            .send_payload(command, metadata, payload)
            .await
    }

    /// Send a batched payload command through the active transport.
    pub async fn send_payload_batch(
        &self,
        command: Command,
        metadata: MessageMetadata,
        payloads: Vec<Bytes>,
    ) -> Result<()> {
        self.current()
            .await?
            .send_payload_batch(command, metadata, payloads)
            .await
    }
}

impl Default for SharedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn test_empty_handle_rejects_sends() {
        let shared = SharedTransport::new();
        assert!(!shared.is_connected().await);

        let result = shared.send_simple(Command::ping()).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }

    #[tokio::test]
    async fn test_replace_installs_new_transport() {
        let bus = EventBus::new();
        let (first, _rx1) = MemoryTransport::new(bus.clone());
        let (second, _rx2) = MemoryTransport::new(bus.clone());

        let shared = SharedTransport::with_transport(first.clone());
        shared.send_simple(Command::ping()).await.unwrap();

        shared.replace(second.clone()).await;
        shared.send_simple(Command::pong()).await.unwrap();

        assert_eq!(first.sent().len(), 1);
        assert_eq!(second.sent().len(), 1);
        assert!(matches!(second.sent()[0].command, Command::Pong));
    }
}
