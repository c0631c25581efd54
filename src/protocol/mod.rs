//! Protocol module - frame kinds, commands and wire framing.
//!
//! - [`Frame`] / [`FrameKind`] - decoded inbound frames as a closed union
//! - [`Command`] - outbound command constructors
//! - [`FrameDecoder`] - incremental wire decode for the TCP transport

mod commands;
mod frame;
mod wire;

pub use commands::Command;
pub use frame::{AccessMode, AckType, Frame, FrameKind, MessageIdData, MessageMetadata, SubType};
pub use wire::{
    decode_frame, encode_envelope, Envelope, FrameDecoder, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE,
};
