//! Error types for pulsewire-client.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failed to establish or maintain the connection.
    ///
    /// Fatal unless a reconnection collaborator installs a fresh transport.
    #[error("connection error: {0}")]
    Connection(String),

    /// The transport or event bus closed underneath a pending operation.
    #[error("connection closed")]
    ConnectionClosed,

    /// No matching response was observed within the configured bound.
    ///
    /// The local waiter is removed, but any broker-side effect already in
    /// flight is not retracted: semantics on timeout are at-least-once.
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// Explicit error frame from the broker.
    #[error("broker error {code}: {message}")]
    Broker { code: i32, message: String },

    /// Producer creation rejected, e.g. an exclusive-access conflict.
    #[error("producer creation failed: {0}")]
    ProducerCreation(String),

    /// Broker rejected the close of a producer.
    #[error("producer close failed: {0}")]
    ProducerClose(String),

    /// `run()` was called before `subscribe()` succeeded.
    #[error("not subscribed: subscribe() must succeed before run()")]
    NotSubscribed,

    /// Empty payload rejected before any network activity.
    #[error("message payload must not be empty")]
    NoPayload,

    /// Discovery could not resolve the topic to a broker address.
    #[error("topic lookup failed: {0}")]
    TopicLookup(String),

    /// Protocol violation (unexpected frame kind, oversized frame, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
