//! Wire framing for the TCP transport.
//!
//! Each direction carries length-prefixed MsgPack values:
//!
//! ```text
//! ┌───────────────┬──────────────────────┐
//! │ Length        │ Body                 │
//! │ 4 bytes, u32  │ MsgPack (map-named)  │
//! │ Big Endian    │                      │
//! └───────────────┴──────────────────────┘
//! ```
//!
//! Outbound bodies are [`Envelope`] values (command plus optional payloads);
//! inbound bodies decode directly into [`Frame`]. [`FrameDecoder`]
//! accumulates partial reads with a two-state machine over `BytesMut`.

use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::commands::Command;
use super::frame::{Frame, MessageMetadata};
use crate::error::{ClientError, Result};

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum accepted body size (5 MB, the broker's frame cap).
pub const MAX_FRAME_SIZE: u32 = 5 * 1024 * 1024;

/// Outbound wire value: a command plus optional message payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub command: Command,
    pub metadata: Option<MessageMetadata>,
    pub payloads: Vec<Bytes>,
}

impl Envelope {
    /// Envelope for a simple (payload-free) command.
    pub fn simple(command: Command) -> Self {
        Self {
            command,
            metadata: None,
            payloads: Vec::new(),
        }
    }

    /// Envelope for a payload command.
    pub fn payload(command: Command, metadata: MessageMetadata, payloads: Vec<Bytes>) -> Self {
        Self {
            command,
            metadata: Some(metadata),
            payloads,
        }
    }
}

/// Encode an envelope as a length-prefixed wire frame.
///
/// Uses `to_vec_named` so bodies are maps keyed by field name; the broker
/// rejects positional encodings.
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes> {
    let body = rmp_serde::to_vec_named(envelope)?;
    if body.len() > MAX_FRAME_SIZE as usize {
        return Err(ClientError::Protocol(format!(
            "outbound frame of {} bytes exceeds the {} byte cap",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(Bytes::from(buf))
}

/// Decode a complete inbound body into a frame.
pub fn decode_frame(body: &[u8]) -> Result<Frame> {
    Ok(rmp_serde::from_slice(body)?)
}

/// State machine for inbound frame parsing.
#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Waiting for the 4-byte length prefix.
    WaitingForLength,
    /// Length parsed, waiting for that many body bytes.
    WaitingForBody { length: usize },
}

/// Accumulates socket reads and extracts complete inbound frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    state: DecodeState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: DecodeState::WaitingForLength,
        }
    }

    /// Push newly read bytes; returns every frame completed by them.
    ///
    /// Fragmented input is fine: state is kept across calls, so a frame split
    /// over any number of reads decodes once its last byte arrives.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            match self.state {
                DecodeState::WaitingForLength => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        break;
                    }
                    let length = u32::from_be_bytes([
                        self.buffer[0],
                        self.buffer[1],
                        self.buffer[2],
                        self.buffer[3],
                    ]);
                    if length > MAX_FRAME_SIZE {
                        return Err(ClientError::Protocol(format!(
                            "inbound frame of {length} bytes exceeds the {MAX_FRAME_SIZE} byte cap"
                        )));
                    }
                    self.buffer.advance(LENGTH_PREFIX_SIZE);
                    self.state = DecodeState::WaitingForBody {
                        length: length as usize,
                    };
                }
                DecodeState::WaitingForBody { length } => {
                    if self.buffer.len() < length {
                        break;
                    }
                    let body = self.buffer.split_to(length);
                    frames.push(decode_frame(&body)?);
                    self.state = DecodeState::WaitingForLength;
                }
            }
        }

        Ok(frames)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::MessageIdData;

    fn wire_bytes(frame: &Frame) -> Vec<u8> {
        let body = rmp_serde::to_vec_named(frame).unwrap();
        let mut buf = (body.len() as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&body);
        buf
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::payload(
            Command::send(1, 2, 3, 1),
            MessageMetadata {
                producer_name: "p".into(),
                sequence_id: 3,
                publish_time: 1000,
                properties: Default::default(),
            },
            vec![Bytes::from_static(b"hello")],
        );

        let encoded = encode_envelope(&envelope).unwrap();
        assert_eq!(
            u32::from_be_bytes(encoded[..4].try_into().unwrap()) as usize,
            encoded.len() - LENGTH_PREFIX_SIZE
        );

        let decoded: Envelope = rmp_serde::from_slice(&encoded[LENGTH_PREFIX_SIZE..]).unwrap();
        assert!(matches!(
            decoded.command,
            Command::Send { request_id: 2, .. }
        ));
        assert_eq!(decoded.payloads[0], Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_decoder_single_frame() {
        let frame = Frame::Success { request_id: 17 };
        let mut decoder = FrameDecoder::new();

        let frames = decoder.push(&wire_bytes(&frame)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id(), Some(17));
    }

    #[test]
    fn test_decoder_fragmented_input() {
        let frame = Frame::Message {
            consumer_id: 4,
            message_id: MessageIdData::new(8, 2),
            metadata: MessageMetadata::default(),
            payload: Bytes::from_static(b"fragmented"),
        };
        let bytes = wire_bytes(&frame);
        let mut decoder = FrameDecoder::new();

        // Byte-at-a-time: nothing completes until the final byte.
        for byte in &bytes[..bytes.len() - 1] {
            assert!(decoder.push(std::slice::from_ref(byte)).unwrap().is_empty());
        }
        let frames = decoder.push(&bytes[bytes.len() - 1..]).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Message {
                consumer_id,
                payload,
                ..
            } => {
                assert_eq!(*consumer_id, 4);
                assert_eq!(payload, &Bytes::from_static(b"fragmented"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decoder_multiple_frames_one_read() {
        let mut bytes = Vec::new();
        for id in 1..=5u64 {
            bytes.extend(wire_bytes(&Frame::Success { request_id: id }));
        }

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes).unwrap();
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.request_id(), Some(i as u64 + 1));
        }
    }

    #[test]
    fn test_decoder_rejects_oversized_frame() {
        let mut decoder = FrameDecoder::new();
        let length = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let result = decoder.push(&length);
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }
}
