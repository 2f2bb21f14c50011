//! Protocol implementation module
//!
//! This module defines MAVLink framing, checksums, message signing and the
//! handful of messages the link monitor exchanges with an autopilot.

pub mod codec;
pub mod crc;
pub mod frame;
pub mod message;
pub mod signing;

pub use self::codec::{decode_frame, DecodeStatus, Decoded, FrameCodec, RejectReason};
pub use self::frame::{Frame, Signature, Version};
pub use self::message::{DataStream, Heartbeat, Message, RequestDataStream, Timesync};
pub use self::signing::{sign, SignatureVerifier, Signer, SigningError, SigningKey};

/// Largest frame on the wire: v2 header, full payload, checksum and signature
pub const MAX_FRAME_SIZE: usize =
    frame::HEADER_LEN_V2 + 255 + frame::CHECKSUM_LEN + frame::SIGNATURE_LEN;

/// Largest UDP datagram accepted from a peer
pub const MAX_DATAGRAM_SIZE: usize = 65507;
