//! Decoded inbound frames.
//!
//! The broker pushes a closed set of response kinds. Each inbound frame is
//! decoded by the transport into the [`Frame`] union and published onto the
//! event bus keyed by its [`FrameKind`]. Dispatch everywhere in the crate is
//! by exhaustive match on these enums, never by string comparison.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Closed set of inbound response kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// Handshake accepted.
    Connected,
    /// Broker-initiated liveness probe.
    Ping,
    /// Reply to a client-initiated ping.
    Pong,
    /// Generic success response, matched by request id.
    Success,
    /// Broker error response, matched by request id.
    Error,
    /// Acknowledgment response, matched by request id.
    AckResponse,
    /// Pushed message for a consumer.
    Message,
    /// Producer created, or a send receipt, carrying an embedded request id.
    ProducerSuccess,
    /// Broker-initiated producer close (e.g. topic unload).
    CloseProducer,
}

impl FrameKind {
    /// All kinds, in wire declaration order.
    pub const ALL: [FrameKind; 9] = [
        FrameKind::Connected,
        FrameKind::Ping,
        FrameKind::Pong,
        FrameKind::Success,
        FrameKind::Error,
        FrameKind::AckResponse,
        FrameKind::Message,
        FrameKind::ProducerSuccess,
        FrameKind::CloseProducer,
    ];
}

/// Message identifier assigned by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageIdData {
    pub ledger_id: u64,
    pub entry_id: u64,
}

impl MessageIdData {
    pub fn new(ledger_id: u64, entry_id: u64) -> Self {
        Self {
            ledger_id,
            entry_id,
        }
    }
}

/// Metadata attached to every published message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Name of the producer that published the message.
    pub producer_name: String,
    /// Producer-scoped sequence number.
    pub sequence_id: u64,
    /// Publish timestamp, milliseconds since the epoch.
    pub publish_time: u64,
    /// Application-defined properties.
    pub properties: HashMap<String, String>,
}

/// A decoded inbound frame: discriminated `{kind, fields}` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Connected {
        server_version: String,
        protocol_version: i32,
    },
    Ping,
    Pong,
    Success {
        request_id: u64,
    },
    Error {
        request_id: u64,
        code: i32,
        message: String,
    },
    AckResponse {
        request_id: u64,
        consumer_id: u64,
    },
    Message {
        consumer_id: u64,
        message_id: MessageIdData,
        metadata: MessageMetadata,
        payload: Bytes,
    },
    ProducerSuccess {
        request_id: u64,
        producer_name: String,
    },
    CloseProducer {
        producer_id: u64,
        request_id: u64,
    },
}

impl Frame {
    /// The kind discriminant of this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Connected { .. } => FrameKind::Connected,
            Frame::Ping => FrameKind::Ping,
            Frame::Pong => FrameKind::Pong,
            Frame::Success { .. } => FrameKind::Success,
            Frame::Error { .. } => FrameKind::Error,
            Frame::AckResponse { .. } => FrameKind::AckResponse,
            Frame::Message { .. } => FrameKind::Message,
            Frame::ProducerSuccess { .. } => FrameKind::ProducerSuccess,
            Frame::CloseProducer { .. } => FrameKind::CloseProducer,
        }
    }

    /// The embedded request id, for kinds that carry one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Frame::Success { request_id }
            | Frame::Error { request_id, .. }
            | Frame::AckResponse { request_id, .. }
            | Frame::ProducerSuccess { request_id, .. }
            | Frame::CloseProducer { request_id, .. } => Some(*request_id),
            Frame::Connected { .. } | Frame::Ping | Frame::Pong | Frame::Message { .. } => None,
        }
    }
}

/// Subscription type requested at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubType {
    Exclusive,
    Shared,
    Failover,
    KeyShared,
}

/// Acknowledgment granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckType {
    /// Acknowledge exactly one message.
    Individual,
    /// Acknowledge every message up to and including the given id.
    Cumulative,
}

/// Producer exclusivity policy for a topic, enforced by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// Creation fails immediately if another exclusive producer owns the topic.
    Exclusive,
    /// Any number of producers coexist.
    Shared,
    /// Creation does not resolve until the exclusive slot is granted.
    WaitForExclusive,
}
