//! Connection session: handshake and keep-alive.
//!
//! A [`Client`] owns one logical connection to a broker node: the swappable
//! transport handle, the event bus every decoded frame lands on, and the
//! id-less mediator used for the connect handshake. After the handshake two
//! independent services run for the session's lifetime:
//!
//! - **pinger** - fires a ping every interval without awaiting a reply
//! - **ponger** - answers broker-initiated pings with a pong
//!
//! Neither service retries: a transport failure degrades the session and
//! reconnection is the caller's responsibility. A reconnection collaborator
//! installs the fresh transport via [`Client::transport`]'s
//! [`replace`](crate::transport::SharedTransport::replace).
//!
//! # Example
//!
//! ```ignore
//! use pulsewire_client::{Client, ClientConfig};
//!
//! let client = Client::new(ClientConfig::new("broker:6650").auth_token("jwt"));
//! client.connect("my-topic").await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::config::{ClientConfig, PROTOCOL_VERSION};
use crate::discovery::{split_address, Discovery, StaticDiscovery};
use crate::error::Result;
use crate::mediator::BroadcastMediator;
use crate::protocol::{Command, FrameKind};
use crate::transport::{SharedTransport, TcpTransport, Transport};

/// Kinds recognized by the session's id-less mediator.
const BROADCAST_KINDS: [FrameKind; 6] = [
    FrameKind::Connected,
    FrameKind::Ping,
    FrameKind::Pong,
    FrameKind::Message,
    FrameKind::ProducerSuccess,
    FrameKind::CloseProducer,
];

/// One logical connection to a broker node.
pub struct Client {
    config: ClientConfig,
    bus: EventBus,
    transport: SharedTransport,
    discovery: Arc<dyn Discovery>,
    broadcasts: BroadcastMediator,
    connected: AtomicBool,
    connect_lock: tokio::sync::Mutex<()>,
    services: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Create a client with its own event bus.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_bus(config, EventBus::new())
    }

    /// Create a client around an injected event bus.
    ///
    /// Tests and embedders pass their own bus so independent sessions never
    /// cross-talk.
    pub fn with_bus(config: ClientConfig, bus: EventBus) -> Self {
        let broadcasts =
            BroadcastMediator::new(bus.clone(), BROADCAST_KINDS.to_vec(), config.request_timeout);
        let discovery = Arc::new(StaticDiscovery::new(config.broker.clone()));
        Self {
            config,
            bus,
            transport: SharedTransport::new(),
            discovery,
            broadcasts,
            connected: AtomicBool::new(false),
            connect_lock: tokio::sync::Mutex::new(()),
            services: Mutex::new(Vec::new()),
        }
    }

    /// Replace the discovery collaborator.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = discovery;
        self
    }

    /// Connect to the broker serving `topic` and run the handshake.
    ///
    /// Resolves the topic through discovery, establishes the TCP transport,
    /// sends the connect command and awaits the `Connected` broadcast. A
    /// no-op when the session is already connected.
    pub async fn connect(&self, topic: &str) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let address = self.discovery.lookup(topic).await?;
        let (host, port) = split_address(&address)?;
        let transport = TcpTransport::connect(host, port, self.bus.clone()).await?;
        self.transport.replace(transport).await;
        self.handshake().await
    }

    /// Run the handshake over an already established transport.
    ///
    /// Used by tests and embedders with their own transport implementation.
    pub async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.transport.replace(transport).await;
        self.handshake().await
    }

    async fn handshake(&self) -> Result<()> {
        let command = Command::connect(PROTOCOL_VERSION, self.config.auth_token.clone());
        self.broadcasts
            .send_and_wait(&self.transport, command, FrameKind::Connected)
            .await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(broker = %self.config.broker, "session connected");

        let mut services = self.services.lock().expect("services lock poisoned");
        services.push(spawn_pinger(
            self.transport.clone(),
            self.config.ping_interval,
        ));
        services.push(spawn_ponger(self.bus.clone(), self.transport.clone()));
        Ok(())
    }

    /// The session's event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The session's swappable transport handle.
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// The session's id-less mediator.
    pub fn broadcasts(&self) -> &BroadcastMediator {
        &self.broadcasts
    }

    /// The shared bound applied to id-bearing requests.
    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let services = self.services.lock().expect("services lock poisoned");
        for task in services.iter() {
            task.abort();
        }
    }
}

/// Fire a ping every `interval` without awaiting a reply.
fn spawn_pinger(transport: SharedTransport, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval() completes immediately once; the first ping waits a full
        // period like every later one.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = transport.send_simple(Command::ping()).await {
                tracing::warn!(%err, "keep-alive ping failed, stopping pinger");
                return;
            }
            tracing::debug!("keep-alive ping sent");
        }
    })
}

/// Answer broker-initiated pings with a pong.
fn spawn_ponger(bus: EventBus, transport: SharedTransport) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = bus.subscribe(FrameKind::Ping);
        loop {
            match rx.recv().await {
                Ok(_) => {
                    if let Err(err) = transport.send_simple(Command::pong()).await {
                        tracing::warn!(%err, "pong reply failed, stopping ponger");
                        return;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "ponger lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}
