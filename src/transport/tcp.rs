//! TCP transport.
//!
//! One connected socket, split into two tasks for the session's lifetime:
//!
//! ```text
//! socket read half ─► read loop ─► FrameDecoder ─► EventBus
//! senders ─► mpsc::Sender<Bytes> ─► writer task ─► socket write half
//! ```
//!
//! The writer task drains ready frames in small batches so concurrent
//! producers share syscalls instead of contending on a lock. Neither task
//! retries: any socket failure ends the task, the session degrades, and
//! reconnection is the caller's responsibility.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::Transport;
use crate::bus::EventBus;
use crate::error::{ClientError, Result};
use crate::protocol::{encode_envelope, Command, Envelope, FrameDecoder, MessageMetadata};

/// Capacity of the outbound frame channel.
const WRITER_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames drained per write batch.
const MAX_WRITE_BATCH: usize = 64;

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A connected TCP transport.
pub struct TcpTransport {
    tx: mpsc::Sender<Bytes>,
    peer: String,
}

impl TcpTransport {
    /// Connect to `host:port` and start the read loop and writer task.
    ///
    /// Decoded inbound frames are published onto `bus`. Fails with a
    /// connection error if the socket cannot be established.
    pub async fn connect(host: &str, port: u16, bus: EventBus) -> Result<Arc<Self>> {
        let peer = format!("{host}:{port}");
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ClientError::Connection(format!("{peer}: {e}")))?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);

        tokio::spawn(read_loop(read_half, bus, peer.clone()));
        tokio::spawn(write_loop(rx, write_half, peer.clone()));

        Ok(Arc::new(Self { tx, peer }))
    }

    /// The `host:port` this transport is connected to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn enqueue(&self, envelope: &Envelope) -> Result<()> {
        let bytes = encode_envelope(envelope)?;
        self.tx
            .send(bytes)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send_simple(&self, command: Command) -> Result<()> {
        self.enqueue(&Envelope::simple(command)).await
    }

    async fn send_payload(
        &self,
        command: Command,
        metadata: MessageMetadata,
        payload: Bytes,
    ) -> Result<()> {
        self.enqueue(&Envelope::payload(command, metadata, vec![payload]))
            .await
    }

    async fn send_payload_batch(
        &self,
        command: Command,
        metadata: MessageMetadata,
        payloads: Vec<Bytes>,
    ) -> Result<()> {
        self.enqueue(&Envelope::payload(command, metadata, payloads))
            .await
    }
}

/// Read loop: socket bytes in, decoded frames onto the bus.
async fn read_loop(mut reader: OwnedReadHalf, bus: EventBus, peer: String) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(%peer, "broker closed the connection");
                return;
            }
            Ok(n) => match decoder.push(&buf[..n]) {
                Ok(frames) => {
                    for frame in frames {
                        bus.publish(frame);
                    }
                }
                Err(err) => {
                    tracing::error!(%peer, %err, "inbound decode failed, stopping read loop");
                    return;
                }
            },
            Err(err) => {
                tracing::error!(%peer, %err, "socket read failed, stopping read loop");
                return;
            }
        }
    }
}

/// Writer task: drains encoded frames in batches and writes them out.
async fn write_loop(mut rx: mpsc::Receiver<Bytes>, mut writer: OwnedWriteHalf, peer: String) {
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_WRITE_BATCH);
        batch.push(first);
        while batch.len() < MAX_WRITE_BATCH {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        for frame in &batch {
            if let Err(err) = writer.write_all(frame).await {
                tracing::error!(%peer, %err, "socket write failed, stopping writer task");
                return;
            }
        }
        if let Err(err) = writer.flush().await {
            tracing::error!(%peer, %err, "socket flush failed, stopping writer task");
            return;
        }
    }
    // Channel closed: transport handle dropped, clean shutdown.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, FrameKind};
    use tokio::net::TcpListener;

    async fn server_and_transport() -> (TcpStream, Arc<TcpTransport>, EventBus) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let bus = EventBus::new();
        let accept = listener.accept();
        let connect = TcpTransport::connect("127.0.0.1", addr.port(), bus.clone());
        let (accepted, transport) = tokio::join!(accept, connect);
        (accepted.unwrap().0, transport.unwrap(), bus)
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 is essentially never listening.
        let result = TcpTransport::connect("127.0.0.1", 1, EventBus::new()).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }

    #[tokio::test]
    async fn test_outbound_command_reaches_socket() {
        let (mut server, transport, _bus) = server_and_transport().await;

        transport.send_simple(Command::ping()).await.unwrap();

        let mut len_buf = [0u8; 4];
        server.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        server.read_exact(&mut body).await.unwrap();

        let envelope: Envelope = rmp_serde::from_slice(&body).unwrap();
        assert!(matches!(envelope.command, Command::Ping));
        assert!(envelope.payloads.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_frame_reaches_bus() {
        let (mut server, _transport, bus) = server_and_transport().await;
        let mut rx = bus.subscribe(FrameKind::Success);

        let body = rmp_serde::to_vec_named(&Frame::Success { request_id: 5 }).unwrap();
        server
            .write_all(&(body.len() as u32).to_be_bytes())
            .await
            .unwrap();
        server.write_all(&body).await.unwrap();
        server.flush().await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.request_id(), Some(5));
    }

    #[tokio::test]
    async fn test_payload_roundtrip_over_socket() {
        let (mut server, transport, _bus) = server_and_transport().await;

        transport
            .send_payload(
                Command::send(1, 2, 3, 1),
                MessageMetadata::default(),
                Bytes::from_static(b"over tcp"),
            )
            .await
            .unwrap();

        let mut len_buf = [0u8; 4];
        server.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        server.read_exact(&mut body).await.unwrap();

        let envelope: Envelope = rmp_serde::from_slice(&body).unwrap();
        assert_eq!(envelope.payloads[0], Bytes::from_static(b"over tcp"));
    }
}
