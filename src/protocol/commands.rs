//! Outbound command constructors.
//!
//! The command codec surface: one constructor per protocol operation. The
//! session and entity layers treat commands purely as data; encoding happens
//! in the transport.

use serde::{Deserialize, Serialize};

use super::frame::{AccessMode, AckType, MessageIdData, SubType};

/// An outbound command, ready for the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Connect {
        protocol_version: i32,
        auth_token: Option<String>,
    },
    Ping,
    Pong,
    Subscribe {
        topic: String,
        subscription: String,
        sub_type: SubType,
        consumer_id: u64,
        request_id: u64,
        consumer_name: String,
        read_compacted: bool,
    },
    Flow {
        consumer_id: u64,
        message_permits: u32,
    },
    Unsubscribe {
        consumer_id: u64,
        request_id: u64,
    },
    Ack {
        consumer_id: u64,
        request_id: u64,
        ack_type: AckType,
        message_id: MessageIdData,
    },
    CreateProducer {
        topic: String,
        producer_id: u64,
        request_id: u64,
        producer_name: Option<String>,
        access_mode: AccessMode,
    },
    Send {
        producer_id: u64,
        request_id: u64,
        sequence_id: u64,
        num_messages: u32,
    },
    CloseProducer {
        producer_id: u64,
        request_id: u64,
    },
}

impl Command {
    /// Handshake command carrying the fixed protocol version.
    pub fn connect(protocol_version: i32, auth_token: Option<String>) -> Self {
        Command::Connect {
            protocol_version,
            auth_token,
        }
    }

    /// Client-initiated liveness probe (fire-and-forget).
    pub fn ping() -> Self {
        Command::Ping
    }

    /// Reply to a broker-initiated ping.
    pub fn pong() -> Self {
        Command::Pong
    }

    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        topic: impl Into<String>,
        subscription: impl Into<String>,
        sub_type: SubType,
        consumer_id: u64,
        request_id: u64,
        consumer_name: impl Into<String>,
        read_compacted: bool,
    ) -> Self {
        Command::Subscribe {
            topic: topic.into(),
            subscription: subscription.into(),
            sub_type,
            consumer_id,
            request_id,
            consumer_name: consumer_name.into(),
            read_compacted,
        }
    }

    /// Grant the broker `message_permits` more pushes for this consumer.
    pub fn flow(consumer_id: u64, message_permits: u32) -> Self {
        Command::Flow {
            consumer_id,
            message_permits,
        }
    }

    pub fn unsubscribe(consumer_id: u64, request_id: u64) -> Self {
        Command::Unsubscribe {
            consumer_id,
            request_id,
        }
    }

    pub fn ack(
        consumer_id: u64,
        request_id: u64,
        ack_type: AckType,
        message_id: MessageIdData,
    ) -> Self {
        Command::Ack {
            consumer_id,
            request_id,
            ack_type,
            message_id,
        }
    }

    pub fn create_producer(
        topic: impl Into<String>,
        producer_id: u64,
        request_id: u64,
        producer_name: Option<String>,
        access_mode: AccessMode,
    ) -> Self {
        Command::CreateProducer {
            topic: topic.into(),
            producer_id,
            request_id,
            producer_name,
            access_mode,
        }
    }

    /// Payload command for a single message or a batch of `num_messages`.
    pub fn send(producer_id: u64, request_id: u64, sequence_id: u64, num_messages: u32) -> Self {
        Command::Send {
            producer_id,
            request_id,
            sequence_id,
            num_messages,
        }
    }

    pub fn close_producer(producer_id: u64, request_id: u64) -> Self {
        Command::CloseProducer {
            producer_id,
            request_id,
        }
    }

    /// The correlation id this command was tagged with, if id-bearing.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Command::Subscribe { request_id, .. }
            | Command::Unsubscribe { request_id, .. }
            | Command::Ack { request_id, .. }
            | Command::CreateProducer { request_id, .. }
            | Command::Send { request_id, .. }
            | Command::CloseProducer { request_id, .. } => Some(*request_id),
            Command::Connect { .. } | Command::Ping | Command::Pong | Command::Flow { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_bearing_commands() {
        let cmd = Command::subscribe("t", "s", SubType::Shared, 1, 5, "c", false);
        assert_eq!(cmd.request_id(), Some(5));

        let cmd = Command::send(0, 9, 3, 1);
        assert_eq!(cmd.request_id(), Some(9));

        let cmd = Command::ack(1, 11, AckType::Individual, MessageIdData::new(4, 2));
        assert_eq!(cmd.request_id(), Some(11));
    }

    #[test]
    fn test_id_less_commands() {
        assert_eq!(Command::ping().request_id(), None);
        assert_eq!(Command::pong().request_id(), None);
        assert_eq!(Command::flow(1, 250).request_id(), None);
        assert_eq!(Command::connect(17, None).request_id(), None);
    }
}
