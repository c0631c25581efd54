//! In-memory transport for tests and examples.
//!
//! Records every sent command, exposes them both as a log and as a channel a
//! scripted broker can drain, and injects inbound frames straight onto the
//! session's event bus. Sends can be armed to fail, which is how the
//! producer retry path is exercised without a real broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::Transport;
use crate::bus::EventBus;
use crate::error::{ClientError, Result};
use crate::protocol::{Command, Frame, MessageMetadata};

/// A command captured by the in-memory transport.
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub command: Command,
    pub metadata: Option<MessageMetadata>,
    pub payloads: Vec<Bytes>,
}

/// Transport double keeping everything in process.
pub struct MemoryTransport {
    bus: EventBus,
    tx: mpsc::UnboundedSender<SentCommand>,
    log: Mutex<Vec<SentCommand>>,
    failures: AtomicUsize,
}

impl MemoryTransport {
    /// Create a transport publishing inbound frames onto `bus`.
    ///
    /// The returned receiver yields every sent command in order, which lets a
    /// test play broker deterministically.
    pub fn new(bus: EventBus) -> (Arc<Self>, mpsc::UnboundedReceiver<SentCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            bus,
            tx,
            log: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    /// Make the next `n` sends fail synchronously with a connection error.
    pub fn fail_next_sends(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Inject an inbound frame, as if decoded off the wire.
    pub fn inject(&self, frame: Frame) {
        self.bus.publish(frame);
    }

    /// Snapshot of every command sent so far.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.log.lock().expect("log lock poisoned").clone()
    }

    fn record(&self, sent: SentCommand) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ClientError::Connection("simulated transport fault".into()));
        }

        self.log.lock().expect("log lock poisoned").push(sent.clone());
        // Receiver side may be gone; the log still captures everything.
        let _ = self.tx.send(sent);
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_simple(&self, command: Command) -> Result<()> {
        self.record(SentCommand {
            command,
            metadata: None,
            payloads: Vec::new(),
        })
    }

    async fn send_payload(
        &self,
        command: Command,
        metadata: MessageMetadata,
        payload: Bytes,
    ) -> Result<()> {
        self.record(SentCommand {
            command,
            metadata: Some(metadata),
            payloads: vec![payload],
        })
    }

    async fn send_payload_batch(
        &self,
        command: Command,
        metadata: MessageMetadata,
        payloads: Vec<Bytes>,
    ) -> Result<()> {
        self.record(SentCommand {
            command,
            metadata: Some(metadata),
            payloads,
        })
    }
}
