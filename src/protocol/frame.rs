//! MAVLink v1/v2 frame layout.

use bytes::{BufMut, Bytes, BytesMut};

use super::crc::{crc_extra, frame_checksum};
use crate::core::{Error, Result};

/// Start marker of a MAVLink 1 frame
pub const MAGIC_V1: u8 = 0xFE;
/// Start marker of a MAVLink 2 frame
pub const MAGIC_V2: u8 = 0xFD;

pub const HEADER_LEN_V1: usize = 6;
pub const HEADER_LEN_V2: usize = 10;
pub const CHECKSUM_LEN: usize = 2;
pub const SIGNATURE_LEN: usize = 13;

/// Incompatibility flag marking a signed MAVLink 2 frame
pub const INCOMPAT_SIGNED: u8 = 0x01;

/// Protocol generation of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V1,
    V2,
}

impl Version {
    /// Maps a start marker to a protocol version
    pub fn from_magic(byte: u8) -> Option<Self> {
        match byte {
            MAGIC_V1 => Some(Version::V1),
            MAGIC_V2 => Some(Version::V2),
            _ => None,
        }
    }

    pub fn magic(&self) -> u8 {
        match self {
            Version::V1 => MAGIC_V1,
            Version::V2 => MAGIC_V2,
        }
    }

    /// Header length including the start marker
    pub fn header_len(&self) -> usize {
        match self {
            Version::V1 => HEADER_LEN_V1,
            Version::V2 => HEADER_LEN_V2,
        }
    }
}

/// Trailing signature block of a signed MAVLink 2 frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub link_id: u8,
    /// 48-bit timestamp in units of 10 microseconds since 2015-01-01
    pub timestamp: u64,
    /// First six bytes of the SHA-256 signature
    pub tag: [u8; 6],
}

impl Signature {
    /// Parses the 13-byte signature block
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SIGNATURE_LEN {
            return None;
        }
        let mut ts = [0u8; 8];
        ts[..6].copy_from_slice(&bytes[1..7]);
        let mut tag = [0u8; 6];
        tag.copy_from_slice(&bytes[7..13]);
        Some(Signature {
            link_id: bytes[0],
            timestamp: u64::from_le_bytes(ts),
            tag,
        })
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u8(self.link_id);
        dst.put_slice(&self.timestamp.to_le_bytes()[..6]);
        dst.put_slice(&self.tag);
    }
}

/// One checksum-valid protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: Version,
    pub incompat_flags: u8,
    pub compat_flags: u8,
    pub seq: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u32,
    pub payload: Bytes,
    pub checksum: u16,
    pub signature: Option<Signature>,
}

impl Frame {
    /// Builds an unsigned frame and computes its checksum.
    ///
    /// MAVLink 2 payloads lose their trailing zero bytes on the wire.
    pub fn new(
        version: Version,
        seq: u8,
        system_id: u8,
        component_id: u8,
        message_id: u32,
        payload: &[u8],
    ) -> Result<Self> {
        let payload = match version {
            Version::V1 => {
                if message_id > u8::MAX as u32 {
                    return Err(Error::protocol(format!(
                        "message id {} does not fit a MAVLink 1 frame",
                        message_id
                    )));
                }
                payload
            }
            Version::V2 => truncate_zeros(payload),
        };
        if payload.len() > u8::MAX as usize {
            return Err(Error::protocol(format!(
                "payload of {} bytes is too long",
                payload.len()
            )));
        }

        let mut frame = Frame {
            version,
            incompat_flags: 0,
            compat_flags: 0,
            seq,
            system_id,
            component_id,
            message_id,
            payload: Bytes::copy_from_slice(payload),
            checksum: 0,
            signature: None,
        };
        frame.checksum = frame.compute_checksum().ok_or_else(|| {
            Error::protocol(format!("no CRC_EXTRA known for message {}", message_id))
        })?;
        Ok(frame)
    }

    pub fn is_signed(&self) -> bool {
        self.version == Version::V2 && self.incompat_flags & INCOMPAT_SIGNED != 0
    }

    pub fn header_len(&self) -> usize {
        self.version.header_len()
    }

    /// Bytes this frame occupies on the wire
    pub fn wire_len(&self) -> usize {
        let signature = if self.is_signed() { SIGNATURE_LEN } else { 0 };
        self.header_len() + self.payload.len() + CHECKSUM_LEN + signature
    }

    /// Payload zero-extended to at least `len` bytes
    pub fn payload_padded(&self, len: usize) -> BytesMut {
        let mut buf = BytesMut::with_capacity(len.max(self.payload.len()));
        buf.put_slice(&self.payload);
        if buf.len() < len {
            buf.resize(len, 0);
        }
        buf
    }

    /// Writes the header and payload, without checksum or signature
    pub fn write_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.version.magic());
        dst.put_u8(self.payload.len() as u8);
        match self.version {
            Version::V1 => {
                dst.put_u8(self.seq);
                dst.put_u8(self.system_id);
                dst.put_u8(self.component_id);
                dst.put_u8(self.message_id as u8);
            }
            Version::V2 => {
                dst.put_u8(self.incompat_flags);
                dst.put_u8(self.compat_flags);
                dst.put_u8(self.seq);
                dst.put_u8(self.system_id);
                dst.put_u8(self.component_id);
                dst.put_slice(&self.message_id.to_le_bytes()[..3]);
            }
        }
        dst.put_slice(&self.payload);
    }

    /// Checksum over the current header and payload, `None` for unknown messages
    pub fn compute_checksum(&self) -> Option<u16> {
        let extra = crc_extra(self.message_id)?;
        let mut body = BytesMut::with_capacity(self.header_len() + self.payload.len());
        self.write_body(&mut body);
        Some(frame_checksum(&body[1..], extra))
    }

    /// Serializes the complete frame
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.write_body(&mut buf);
        buf.put_u16_le(self.checksum);
        if let (true, Some(signature)) = (self.is_signed(), &self.signature) {
            signature.write(&mut buf);
        }
        buf.freeze()
    }
}

fn truncate_zeros(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    &payload[..end.max(1).min(payload.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_truncates_trailing_zeros() {
        let frame = Frame::new(Version::V2, 7, 1, 1, 0, &[5, 0, 0, 0, 6, 0, 0, 0, 0]).unwrap();
        assert_eq!(&frame.payload[..], &[5, 0, 0, 0, 6]);
        assert_eq!(frame.wire_len(), HEADER_LEN_V2 + 5 + CHECKSUM_LEN);
        assert_eq!(&frame.payload_padded(9)[..], &[5, 0, 0, 0, 6, 0, 0, 0, 0]);
    }

    #[test]
    fn test_all_zero_payload_keeps_one_byte() {
        let frame = Frame::new(Version::V2, 0, 1, 1, 0, &[0u8; 9]).unwrap();
        assert_eq!(frame.payload.len(), 1);
    }

    #[test]
    fn test_v1_layout() {
        let frame = Frame::new(Version::V1, 3, 1, 2, 0, &[0u8; 9]).unwrap();
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN_V1 + 9 + CHECKSUM_LEN);
        assert_eq!(&bytes[..6], &[MAGIC_V1, 9, 3, 1, 2, 0]);
        let crc = u16::from_le_bytes([bytes[15], bytes[16]]);
        assert_eq!(crc, frame.checksum);
    }

    #[test]
    fn test_v1_rejects_wide_message_id() {
        assert!(Frame::new(Version::V1, 0, 1, 1, 300, &[1]).is_err());
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(Frame::new(Version::V2, 0, 1, 1, 42_000, &[1]).is_err());
    }

    #[test]
    fn test_signature_parse() {
        let sig = Signature {
            link_id: 4,
            timestamp: 0x0000_1234_5678_9ABC,
            tag: [1, 2, 3, 4, 5, 6],
        };
        let mut buf = BytesMut::new();
        sig.write(&mut buf);
        assert_eq!(buf.len(), SIGNATURE_LEN);
        assert_eq!(Signature::parse(&buf), Some(sig));
    }
}
