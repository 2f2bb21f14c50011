//! MAVLink 2 message signing and anti-replay checks.

use std::collections::HashMap;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::codec::RejectReason;
use super::frame::{Frame, Signature, Version, INCOMPAT_SIGNED, MAGIC_V2, SIGNATURE_LEN};
use crate::core::{Error, SigningConfig};

/// Seconds between the Unix epoch and the signing epoch (2015-01-01T00:00:00Z)
const SIGNING_EPOCH_UNIX: i64 = 1_420_070_400;

const TIMESTAMP_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Signing failures on the outgoing side
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("timestamp {timestamp} is not after the last used timestamp {last}")]
    Replay { timestamp: u64, last: u64 },

    #[error("only MAVLink 2 frames can be signed")]
    NotV2,

    #[error("no CRC_EXTRA known for message {0}")]
    UnknownMessage(u32),
}

impl From<SigningError> for Error {
    fn from(err: SigningError) -> Self {
        Error::signing(err.to_string())
    }
}

/// 32-byte secret shared by both ends of a signed link
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    /// Derives the key as SHA-256 of the passphrase
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        SigningKey(key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

/// Signing timestamp for a wall-clock instant
pub fn timestamp_at(time: DateTime<Utc>) -> u64 {
    let epoch = Utc
        .timestamp_opt(SIGNING_EPOCH_UNIX, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let micros = (time - epoch).num_microseconds().unwrap_or(0).max(0) as u64;
    (micros / 10) & TIMESTAMP_MASK
}

/// Signing timestamp for the current time
pub fn timestamp_now() -> u64 {
    timestamp_at(Utc::now())
}

/// Truncated SHA-256 over key, frame (header through checksum), link id and timestamp
pub fn signature_tag(key: &SigningKey, signed_body: &[u8], link_id: u8, timestamp: u64) -> [u8; 6] {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(signed_body);
    hasher.update([link_id]);
    hasher.update(&(timestamp & TIMESTAMP_MASK).to_le_bytes()[..6]);
    let digest = hasher.finalize();
    let mut tag = [0u8; 6];
    tag.copy_from_slice(&digest[..6]);
    tag
}

/// Signs a frame with an explicit timestamp.
///
/// Fails with [`SigningError::Replay`] unless `timestamp` is strictly after
/// `last_timestamp`.
pub fn sign(
    frame: &Frame,
    key: &SigningKey,
    link_id: u8,
    timestamp: u64,
    last_timestamp: Option<u64>,
) -> Result<Bytes, SigningError> {
    if frame.version != Version::V2 {
        return Err(SigningError::NotV2);
    }
    if let Some(last) = last_timestamp {
        if timestamp <= last {
            return Err(SigningError::Replay { timestamp, last });
        }
    }

    let mut signed = frame.clone();
    signed.incompat_flags |= INCOMPAT_SIGNED;
    signed.checksum = signed
        .compute_checksum()
        .ok_or(SigningError::UnknownMessage(frame.message_id))?;

    let mut buf = BytesMut::with_capacity(signed.wire_len());
    signed.write_body(&mut buf);
    buf.put_u16_le(signed.checksum);
    let tag = signature_tag(key, &buf, link_id, timestamp);
    Signature {
        link_id,
        timestamp: timestamp & TIMESTAMP_MASK,
        tag,
    }
    .write(&mut buf);
    Ok(buf.freeze())
}

/// Outgoing signer with a strictly increasing timestamp
#[derive(Debug, Clone)]
pub struct Signer {
    key: SigningKey,
    link_id: u8,
    last_timestamp: Option<u64>,
}

impl Signer {
    pub fn new(key: SigningKey, link_id: u8) -> Self {
        Signer {
            key,
            link_id,
            last_timestamp: None,
        }
    }

    pub fn from_config(config: &SigningConfig) -> Self {
        Signer::new(SigningKey::from_passphrase(&config.passphrase), config.link_id)
    }

    /// Signs with the current time, bumped past the previous timestamp if needed
    pub fn sign(&mut self, frame: &Frame) -> Result<Bytes, SigningError> {
        let now = timestamp_now();
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        let bytes = sign(frame, &self.key, self.link_id, timestamp, self.last_timestamp)?;
        self.last_timestamp = Some(timestamp);
        Ok(bytes)
    }
}

/// Inbound signature check with a per-link-id replay baseline
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: SigningKey,
    allow_unsigned: bool,
    baselines: HashMap<u8, u64>,
}

impl SignatureVerifier {
    pub fn new(key: SigningKey, allow_unsigned: bool) -> Self {
        SignatureVerifier {
            key,
            allow_unsigned,
            baselines: HashMap::new(),
        }
    }

    pub fn from_config(config: &SigningConfig) -> Self {
        SignatureVerifier::new(
            SigningKey::from_passphrase(&config.passphrase),
            config.allow_unsigned,
        )
    }

    /// Last accepted timestamp for a link id
    pub fn baseline(&self, link_id: u8) -> Option<u64> {
        self.baselines.get(&link_id).copied()
    }

    /// Checks a complete, checksum-valid frame.
    ///
    /// The first signed frame seen for a link id seeds its baseline; later
    /// frames on that link id must carry a strictly greater timestamp.
    pub fn verify(&mut self, wire: &[u8]) -> Result<Option<Signature>, RejectReason> {
        let signed = wire.first() == Some(&MAGIC_V2)
            && wire.get(2).map_or(false, |flags| flags & INCOMPAT_SIGNED != 0);
        if !signed {
            return if self.allow_unsigned {
                Ok(None)
            } else {
                Err(RejectReason::Unsigned)
            };
        }
        if wire.len() < SIGNATURE_LEN {
            return Err(RejectReason::BadSignature);
        }

        let (body, tail) = wire.split_at(wire.len() - SIGNATURE_LEN);
        let signature = Signature::parse(tail).ok_or(RejectReason::BadSignature)?;
        let expected = signature_tag(&self.key, body, signature.link_id, signature.timestamp);
        if expected != signature.tag {
            return Err(RejectReason::BadSignature);
        }

        if let Some(last) = self.baselines.get(&signature.link_id) {
            if signature.timestamp <= *last {
                return Err(RejectReason::Replay);
            }
        }
        self.baselines.insert(signature.link_id, signature.timestamp);
        Ok(Some(signature))
    }
}
