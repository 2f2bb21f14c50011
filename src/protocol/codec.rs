use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

use super::crc::{crc_extra, frame_checksum};
use super::frame::{Frame, Signature, Version, CHECKSUM_LEN, INCOMPAT_SIGNED, SIGNATURE_LEN};
use super::message::Message;
use super::signing::{SignatureVerifier, Signer};
use crate::core::{Error, SigningConfig};

/// Why a span of input was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Bytes in front of the next start marker
    Garbage,
    /// Message id without a known CRC_EXTRA
    UnknownMessage(u32),
    /// Incompatibility flags this decoder does not understand
    UnsupportedFlags(u8),
    BadChecksum,
    BadSignature,
    /// Signature timestamp not newer than the last one on its link id
    Replay,
    /// Unsigned frame while signing is required
    Unsigned,
    /// Incomplete frame left over when the input ended
    Truncated,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Garbage => write!(f, "garbage before start marker"),
            RejectReason::UnknownMessage(id) => write!(f, "unknown message id {}", id),
            RejectReason::UnsupportedFlags(flags) => {
                write!(f, "unsupported incompat flags {:#04x}", flags)
            }
            RejectReason::BadChecksum => write!(f, "checksum mismatch"),
            RejectReason::BadSignature => write!(f, "signature mismatch"),
            RejectReason::Replay => write!(f, "replayed signature timestamp"),
            RejectReason::Unsigned => write!(f, "unsigned frame"),
            RejectReason::Truncated => write!(f, "truncated frame"),
        }
    }
}

/// Outcome of decoding from the front of a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A valid frame and the number of bytes it occupied
    Frame(Frame, usize),
    /// The buffer holds the beginning of a frame but not all of it
    NeedMoreData,
    /// The first `len` bytes cannot start a valid frame
    Invalid(usize, RejectReason),
}

/// Decodes at most one frame from the front of `buf`.
///
/// A frame failing validation is rejected one byte at a time: the reported
/// span covers its start marker and everything up to the next start marker,
/// so the caller can resynchronize by discarding exactly that span.
pub fn decode_frame(buf: &[u8], verifier: Option<&mut SignatureVerifier>) -> DecodeStatus {
    let start = match buf.iter().position(|&b| Version::from_magic(b).is_some()) {
        Some(start) => start,
        None if buf.is_empty() => return DecodeStatus::NeedMoreData,
        None => return DecodeStatus::Invalid(buf.len(), RejectReason::Garbage),
    };
    if start > 0 {
        return DecodeStatus::Invalid(start, RejectReason::Garbage);
    }

    // Start marker is known to be valid here
    let version = match Version::from_magic(buf[0]) {
        Some(version) => version,
        None => return DecodeStatus::Invalid(1, RejectReason::Garbage),
    };
    let header_len = version.header_len();
    if buf.len() < header_len {
        return DecodeStatus::NeedMoreData;
    }

    let payload_len = buf[1] as usize;
    let (incompat_flags, compat_flags, seq, system_id, component_id, message_id) = match version {
        Version::V1 => (0, 0, buf[2], buf[3], buf[4], buf[5] as u32),
        Version::V2 => (
            buf[2],
            buf[3],
            buf[4],
            buf[5],
            buf[6],
            u32::from_le_bytes([buf[7], buf[8], buf[9], 0]),
        ),
    };
    if incompat_flags & !INCOMPAT_SIGNED != 0 {
        return resync(buf, RejectReason::UnsupportedFlags(incompat_flags));
    }
    let signed = incompat_flags & INCOMPAT_SIGNED != 0;

    let body_end = header_len + payload_len;
    let total = body_end + CHECKSUM_LEN + if signed { SIGNATURE_LEN } else { 0 };
    if buf.len() < total {
        return DecodeStatus::NeedMoreData;
    }

    let extra = match crc_extra(message_id) {
        Some(extra) => extra,
        None => return resync(buf, RejectReason::UnknownMessage(message_id)),
    };
    let checksum = u16::from_le_bytes([buf[body_end], buf[body_end + 1]]);
    if frame_checksum(&buf[1..body_end], extra) != checksum {
        return resync(buf, RejectReason::BadChecksum);
    }

    let signature = match verifier {
        Some(verifier) => match verifier.verify(&buf[..total]) {
            Ok(signature) => signature,
            Err(reason) => return resync(buf, reason),
        },
        None if signed => Signature::parse(&buf[body_end + CHECKSUM_LEN..total]),
        None => None,
    };

    let frame = Frame {
        version,
        incompat_flags,
        compat_flags,
        seq,
        system_id,
        component_id,
        message_id,
        payload: Bytes::copy_from_slice(&buf[header_len..body_end]),
        checksum,
        signature,
    };
    DecodeStatus::Frame(frame, total)
}

/// Drops the rejected start marker and any bytes up to the next one
fn resync(buf: &[u8], reason: RejectReason) -> DecodeStatus {
    let skip = buf[1..]
        .iter()
        .position(|&b| Version::from_magic(b).is_some())
        .unwrap_or(buf.len() - 1);
    DecodeStatus::Invalid(1 + skip, reason)
}

/// One unit handed from a transport to its monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A valid frame and its size on the wire
    Frame { frame: Frame, len: usize },
    /// Discarded input
    Corrupt { len: usize, reason: RejectReason },
}

/// MAVLink framing codec.
///
/// Decoding yields frames and discarded spans; encoding stamps outgoing
/// messages with this codec's source ids and sequence counter and signs them
/// when a signing key is configured.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    source_system: u8,
    source_component: u8,
    next_seq: u8,
    signer: Option<Signer>,
    verifier: Option<SignatureVerifier>,
}

impl FrameCodec {
    /// Creates an unsigned codec
    pub fn new(source_system: u8, source_component: u8) -> Self {
        FrameCodec {
            source_system,
            source_component,
            next_seq: 0,
            signer: None,
            verifier: None,
        }
    }

    /// Enables signing of outgoing frames and verification of incoming ones
    pub fn with_signing(mut self, config: Option<&SigningConfig>) -> Self {
        if let Some(config) = config {
            self.signer = Some(Signer::from_config(config));
            self.verifier = Some(SignatureVerifier::from_config(config));
        }
        self
    }

    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    /// Encodes one message into a standalone buffer
    pub fn encode_message(&mut self, message: &Message) -> Result<Bytes, Error> {
        let frame = Frame::new(
            Version::V2,
            self.next_seq,
            self.source_system,
            self.source_component,
            message.id(),
            &message.payload(),
        )?;
        let bytes = match self.signer.as_mut() {
            Some(signer) => signer.sign(&frame)?,
            None => frame.to_bytes(),
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(bytes)
    }
}

impl Decoder for FrameCodec {
    type Item = Decoded;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_frame(src, self.verifier.as_mut()) {
            DecodeStatus::Frame(frame, len) => {
                src.advance(len);
                Ok(Some(Decoded::Frame { frame, len }))
            }
            DecodeStatus::Invalid(len, reason) => {
                src.advance(len);
                Ok(Some(Decoded::Corrupt { len, reason }))
            }
            DecodeStatus::NeedMoreData => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None if src.is_empty() => Ok(None),
            None => {
                let len = src.len();
                src.advance(len);
                Ok(Some(Decoded::Corrupt {
                    len,
                    reason: RejectReason::Truncated,
                }))
            }
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = self.encode_message(&item)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{Heartbeat, Timesync};
    use crate::protocol::signing::SigningKey;

    fn heartbeat_bytes(seq: u8) -> Bytes {
        let message = Message::Heartbeat(Heartbeat::ground_station());
        Frame::new(Version::V2, seq, 1, 1, message.id(), &message.payload())
            .unwrap()
            .to_bytes()
    }

    fn drain(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Decoded> {
        let mut out = Vec::new();
        while let Some(item) = codec.decode(buf).unwrap() {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_decode_single_frame() {
        let bytes = heartbeat_bytes(42);
        match decode_frame(&bytes, None) {
            DecodeStatus::Frame(frame, len) => {
                assert_eq!(len, bytes.len());
                assert_eq!(frame.seq, 42);
                assert_eq!(frame.system_id, 1);
                assert_eq!(frame.wire_len(), len);
                assert!(matches!(Message::parse(&frame), Some(Message::Heartbeat(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_need_more_data_on_partial_frame() {
        let bytes = heartbeat_bytes(1);
        for cut in [1, 5, bytes.len() - 1] {
            assert_eq!(decode_frame(&bytes[..cut], None), DecodeStatus::NeedMoreData);
        }
        assert_eq!(decode_frame(&[], None), DecodeStatus::NeedMoreData);
    }

    #[test]
    fn test_garbage_before_marker() {
        let mut buf = BytesMut::from(&[0x00u8, 0x11, 0x22][..]);
        buf.extend_from_slice(&heartbeat_bytes(3));
        let mut codec = FrameCodec::new(255, 0);
        let items = drain(&mut codec, &mut buf);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Decoded::Corrupt { len: 3, reason: RejectReason::Garbage });
        assert!(matches!(&items[1], Decoded::Frame { frame, .. } if frame.seq == 3));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_checksum_failure_resyncs_to_next_frame() {
        let mut bad = BytesMut::from(&heartbeat_bytes(1)[..]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let bad_len = bad.len();
        let mut buf = bad;
        buf.extend_from_slice(&heartbeat_bytes(2));

        let mut codec = FrameCodec::new(255, 0);
        let items = drain(&mut codec, &mut buf);

        // The damaged frame may be reported in more than one span if its
        // checksum bytes happen to look like a start marker
        let corrupt: usize = items
            .iter()
            .map(|item| match item {
                Decoded::Corrupt { len, .. } => *len,
                Decoded::Frame { .. } => 0,
            })
            .sum();
        assert_eq!(corrupt, bad_len);
        assert!(matches!(
            items[0],
            Decoded::Corrupt { reason: RejectReason::BadChecksum, .. }
        ));
        match items.last() {
            Some(Decoded::Frame { frame, len }) => {
                assert_eq!(frame.seq, 2);
                assert_eq!(*len, heartbeat_bytes(2).len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_is_corrupt() {
        let mut bytes = BytesMut::from(&heartbeat_bytes(1)[..]);
        bytes[7] = 0x99;
        bytes[8] = 0x99;
        assert!(matches!(
            decode_frame(&bytes, None),
            DecodeStatus::Invalid(len, RejectReason::UnknownMessage(0x9999)) if len >= 1
        ));
    }

    #[test]
    fn test_dialect_message_outside_monitor_decodes() {
        // FENCE_STATUS from an autopilot
        let fence = Frame::new(Version::V2, 2, 1, 1, 162, &[0x10, 0x27, 0, 0, 1, 0, 0, 0, 0])
            .unwrap()
            .to_bytes();
        match decode_frame(&fence, None) {
            DecodeStatus::Frame(frame, len) => {
                assert_eq!(frame.message_id, 162);
                assert_eq!(frame.seq, 2);
                assert_eq!(len, fence.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stream_split_across_reads() {
        let bytes = heartbeat_bytes(9);
        let mut codec = FrameCodec::new(255, 0);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bytes[..4]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&bytes[4..]);
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(Decoded::Frame { .. })));
    }

    #[test]
    fn test_decode_eof_reports_leftover() {
        let bytes = heartbeat_bytes(9);
        let mut codec = FrameCodec::new(255, 0);
        let mut buf = BytesMut::from(&bytes[..6]);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Decoded::Corrupt { len: 6, reason: RejectReason::Truncated })
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_v1_frame_decodes() {
        let message = Message::Heartbeat(Heartbeat::ground_station());
        let bytes = Frame::new(Version::V1, 5, 1, 1, 0, &message.payload()).unwrap().to_bytes();
        match decode_frame(&bytes, None) {
            DecodeStatus::Frame(frame, len) => {
                assert_eq!(frame.version, Version::V1);
                assert_eq!(len, 17);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encoder_advances_sequence() {
        let mut codec = FrameCodec::new(255, 0);
        let mut dst = BytesMut::new();
        codec.encode(Message::Timesync(Timesync::probe(77, 1, 1)), &mut dst).unwrap();
        codec.encode(Message::Heartbeat(Heartbeat::ground_station()), &mut dst).unwrap();

        let mut decoder = FrameCodec::new(1, 1);
        let items = drain(&mut decoder, &mut dst);
        let seqs: Vec<u8> = items
            .iter()
            .map(|item| match item {
                Decoded::Frame { frame, .. } => {
                    assert_eq!(frame.system_id, 255);
                    frame.seq
                }
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn test_signed_round_trip_and_tamper() {
        let signing = SigningConfig {
            passphrase: "hunter2".to_string(),
            link_id: 7,
            allow_unsigned: false,
        };
        let mut sender = FrameCodec::new(255, 0).with_signing(Some(&signing));
        let mut receiver = FrameCodec::new(1, 1).with_signing(Some(&signing));
        assert!(sender.is_signing());

        let bytes = sender.encode_message(&Message::Heartbeat(Heartbeat::ground_station())).unwrap();
        let mut buf = BytesMut::from(&bytes[..]);
        match receiver.decode(&mut buf).unwrap() {
            Some(Decoded::Frame { frame, len }) => {
                assert!(frame.is_signed());
                assert_eq!(len, frame.wire_len());
                assert_eq!(frame.signature.map(|s| s.link_id), Some(7));
            }
            other => panic!("unexpected {:?}", other),
        }

        // Replaying the same bytes is rejected
        let mut replay = BytesMut::from(&bytes[..]);
        assert!(matches!(
            receiver.decode(&mut replay).unwrap(),
            Some(Decoded::Corrupt { reason: RejectReason::Replay, .. })
        ));

        // A flipped signature byte is rejected
        let mut tampered = BytesMut::from(&sender.encode_message(&Message::Heartbeat(Heartbeat::ground_station())).unwrap()[..]);
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            receiver.decode(&mut tampered).unwrap(),
            Some(Decoded::Corrupt { reason: RejectReason::BadSignature, .. })
        ));
    }

    #[test]
    fn test_signature_ignored_without_key() {
        let key = SigningKey::from_passphrase("x");
        let frame = Frame::new(Version::V2, 0, 1, 1, 0, &[1; 9]).unwrap();
        let bytes = crate::protocol::signing::sign(&frame, &key, 0, 1, None).unwrap();
        match decode_frame(&bytes, None) {
            DecodeStatus::Frame(frame, len) => {
                assert!(frame.is_signed());
                assert_eq!(len, bytes.len());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
