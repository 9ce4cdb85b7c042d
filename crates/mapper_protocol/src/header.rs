//! Binary frame header prefixing every payload on the `zmq-broker` wire.
//!
//! spec.md §6 defines the broker capability set as transport-agnostic
//! (`publish`/`subscribe`/`ack`/`recover`); this header belongs one layer
//! down, in [`mapper_broker::zmq`]'s ROUTER/DEALER framing. It mirrors the
//! teacher's versioned `[VER:1][OP:1][RES:2]...` binary header, shrunk to
//! what this wire's single frame kind needs — a version byte plus a
//! reserved word for whatever a future revision adds.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

pub const FRAME_HEADER_LEN: usize = 4;
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameHeaderError {
    #[error("frame too short for header: got {0} bytes, need {FRAME_HEADER_LEN}")]
    TooShort(usize),
    #[error("unsupported frame version {0}, expected {PROTOCOL_VERSION}")]
    VersionMismatch(u8),
}

/// Fixed-size header: `[VERSION:1][RESERVED_TAG:1][RESERVED:2]`, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub reserved: u16,
}

impl FrameHeader {
    pub fn current() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            reserved: 0,
        }
    }

    pub fn pack(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor.write_u8(self.version).expect("fixed-size buffer");
            cursor.write_u8(0).expect("fixed-size buffer");
            cursor
                .write_u16::<BigEndian>(self.reserved)
                .expect("fixed-size buffer");
        }
        buf
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, FrameHeaderError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameHeaderError::TooShort(bytes.len()));
        }
        let mut cursor = Cursor::new(&bytes[..FRAME_HEADER_LEN]);
        let version = cursor.read_u8().expect("length checked above");
        let _reserved_tag = cursor.read_u8().expect("length checked above");
        let reserved = cursor
            .read_u16::<BigEndian>()
            .expect("length checked above");
        if version != PROTOCOL_VERSION {
            return Err(FrameHeaderError::VersionMismatch(version));
        }
        Ok(Self { version, reserved })
    }
}

/// Prefixes `payload` with a current-version header.
pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    framed.extend_from_slice(&FrameHeader::current().pack());
    framed.extend_from_slice(payload);
    framed
}

/// Validates and strips the header, returning the payload that follows.
pub fn unwrap(framed: &[u8]) -> Result<&[u8], FrameHeaderError> {
    FrameHeader::unpack(framed)?;
    Ok(&framed[FRAME_HEADER_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_then_unwrap_round_trips_the_payload() {
        let payload = b"hello envelope";
        let framed = wrap(payload);
        assert_eq!(unwrap(&framed).unwrap(), payload);
    }

    #[test]
    fn unwrap_rejects_a_frame_shorter_than_the_header() {
        let err = unwrap(&[1, 0]).unwrap_err();
        assert_eq!(err, FrameHeaderError::TooShort(2));
    }

    #[test]
    fn unwrap_rejects_a_mismatched_version() {
        let mut framed = wrap(b"x");
        framed[0] = 0xff;
        let err = unwrap(&framed).unwrap_err();
        assert_eq!(err, FrameHeaderError::VersionMismatch(0xff));
    }
}
