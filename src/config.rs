//! Configuration for clients, consumers and producers.
//!
//! All defaults follow the broker protocol conventions: a fixed protocol
//! version, a 60 s keep-alive cadence and a 500-message receive window.
//! Builders use fluent setters so call sites read top-down.

use std::time::Duration;

use crate::protocol::{AccessMode, SubType};

/// Protocol version advertised in the connect handshake (fixed).
pub const PROTOCOL_VERSION: i32 = 17;

/// Default keep-alive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(60_000);

/// Default bound on every id-bearing request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default consumer receive window (messages).
pub const DEFAULT_RECEIVE_QUEUE_SIZE: u32 = 500;

/// Default idle backoff of the delivery loop.
pub const DEFAULT_POLL_BACKOFF: Duration = Duration::from_millis(1000);

/// Default cap on transport attempts for a single logical send.
pub const DEFAULT_SEND_RETRY_LIMIT: u32 = 30;

/// Default delay between producer send attempts.
pub const DEFAULT_SEND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Session-level configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address as `host:port`.
    pub broker: String,
    /// Optional bearer token sent with the connect command.
    pub auth_token: Option<String>,
    /// Bound applied to every id-bearing request.
    pub request_timeout: Duration,
    /// Keep-alive ping cadence.
    pub ping_interval: Duration,
}

impl ClientConfig {
    /// Create a config pointing at a single broker (`host:port`).
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            auth_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    /// Set the auth token presented during the handshake.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the shared request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the keep-alive ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

/// Consumer-side configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic to subscribe to.
    pub topic: String,
    /// Subscription name.
    pub subscription: String,
    /// Subscription type.
    pub sub_type: SubType,
    /// Consumer name reported to the broker.
    pub consumer_name: String,
    /// Consumer id, scoped to the session.
    pub consumer_id: u64,
    /// Receive window size; also the initial flow credit.
    pub receive_queue_size: u32,
    /// Read from the compacted view of the topic.
    pub read_compacted: bool,
    /// Idle backoff of the delivery loop.
    pub poll_backoff: Duration,
}

impl ConsumerConfig {
    /// Create a consumer config for `topic` under `subscription`.
    pub fn new(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscription: subscription.into(),
            sub_type: SubType::Exclusive,
            consumer_name: String::new(),
            consumer_id: 0,
            receive_queue_size: DEFAULT_RECEIVE_QUEUE_SIZE,
            read_compacted: false,
            poll_backoff: DEFAULT_POLL_BACKOFF,
        }
    }

    /// Set the subscription type.
    pub fn sub_type(mut self, sub_type: SubType) -> Self {
        self.sub_type = sub_type;
        self
    }

    /// Set the consumer name.
    pub fn consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    /// Set the consumer id.
    pub fn consumer_id(mut self, id: u64) -> Self {
        self.consumer_id = id;
        self
    }

    /// Set the receive window size.
    pub fn receive_queue_size(mut self, size: u32) -> Self {
        self.receive_queue_size = size;
        self
    }

    /// Read from the compacted view of the topic.
    pub fn read_compacted(mut self, compacted: bool) -> Self {
        self.read_compacted = compacted;
        self
    }

    /// Set the idle backoff of the delivery loop.
    pub fn poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff = backoff;
        self
    }
}

/// Producer-side configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Topic to publish to.
    pub topic: String,
    /// Producer name; assigned by the broker when absent.
    pub producer_name: Option<String>,
    /// Producer id, scoped to the session.
    pub producer_id: u64,
    /// Access mode requested at creation.
    pub access_mode: AccessMode,
    /// Cap on transport attempts for one logical send.
    pub send_retry_limit: u32,
    /// Delay between send attempts.
    pub send_retry_delay: Duration,
}

impl ProducerConfig {
    /// Create a producer config for `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            producer_name: None,
            producer_id: 0,
            access_mode: AccessMode::Shared,
            send_retry_limit: DEFAULT_SEND_RETRY_LIMIT,
            send_retry_delay: DEFAULT_SEND_RETRY_DELAY,
        }
    }

    /// Set the producer name.
    pub fn producer_name(mut self, name: impl Into<String>) -> Self {
        self.producer_name = Some(name.into());
        self
    }

    /// Set the producer id.
    pub fn producer_id(mut self, id: u64) -> Self {
        self.producer_id = id;
        self
    }

    /// Set the access mode.
    pub fn access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// Cap the transport attempts per logical send.
    pub fn send_retry_limit(mut self, limit: u32) -> Self {
        self.send_retry_limit = limit;
        self
    }

    /// Set the delay between send attempts.
    pub fn send_retry_delay(mut self, delay: Duration) -> Self {
        self.send_retry_delay = delay;
        self
    }
}
