//! Id-less response mediation.
//!
//! Frames without a correlation id (connected, ping, pong, message, producer
//! success, close producer) are fanned out by kind over the shared event bus.
//! The mediator is stateless per request: it only pairs a fire-and-forget
//! send with an optional wait for the first frame of an expected kind, which
//! is all the connect handshake needs.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::bus::EventBus;
use crate::error::{ClientError, Result};
use crate::protocol::{Command, Frame, FrameKind};
use crate::transport::SharedTransport;

/// Fans out id-less frames of a fixed recognized kind set.
pub struct BroadcastMediator {
    bus: EventBus,
    kinds: Vec<FrameKind>,
    timeout: Duration,
}

impl BroadcastMediator {
    /// Create a mediator recognizing `kinds`, with the shared request timeout.
    pub fn new(bus: EventBus, kinds: Vec<FrameKind>, timeout: Duration) -> Self {
        Self {
            bus,
            kinds,
            timeout,
        }
    }

    /// Subscribe to a recognized kind.
    pub fn subscribe(&self, kind: FrameKind) -> broadcast::Receiver<Frame> {
        debug_assert!(self.kinds.contains(&kind), "{kind:?} not recognized");
        self.bus.subscribe(kind)
    }

    /// Send a command without awaiting any response.
    pub async fn send(&self, transport: &SharedTransport, command: Command) -> Result<()> {
        transport.send_simple(command).await
    }

    /// Send a command and await the first frame of `kind`.
    ///
    /// The subscription is taken before the send so the response cannot slip
    /// past. Bounded by the shared request timeout.
    pub async fn send_and_wait(
        &self,
        transport: &SharedTransport,
        command: Command,
        kind: FrameKind,
    ) -> Result<Frame> {
        debug_assert!(self.kinds.contains(&kind), "{kind:?} not recognized");
        let mut rx = self.bus.subscribe(kind);

        transport.send_simple(command).await?;

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(frame) => return Ok(frame),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(?kind, skipped = n, "broadcast wait lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ClientError::ConnectionClosed)
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ResponseTimeout(self.timeout)),
        }
    }
}
