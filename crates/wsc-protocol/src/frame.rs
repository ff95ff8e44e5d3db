//! Helper RPC frame header
//!
//! Every frame starts with 8 bytes:
//! - request_id: 4 bytes (u32, big-endian), echoed back in the response
//! - message_type: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian, max 16MB)

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::MessageType;

pub const HEADER_SIZE: usize = 8;

/// Largest payload a 24-bit length can describe
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Correlates a response with the request that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl RequestId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// The id following this one, wrapping past zero
    pub fn next(&self) -> Self {
        match self.0.wrapping_add(1) {
            0 => Self(1),
            n => Self(n),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Parsed 8-byte prefix of a helper RPC frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub request_id: RequestId,
    pub message_type: MessageType,
    pub payload_length: u32,
}

const TYPE_OFFSET: usize = 4;
const LENGTH_BYTES: usize = 3;

impl FrameHeader {
    pub fn new(request_id: RequestId, message_type: MessageType, payload_length: u32) -> Self {
        Self {
            request_id,
            message_type,
            payload_length,
        }
    }

    /// Append the header to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.request_id.as_u32());
        dst.put_u8(self.message_type.as_u8());
        dst.put_uint(u64::from(self.payload_length), LENGTH_BYTES);
    }

    /// Take a header off the front of `src`.
    ///
    /// `Ok(None)` means more bytes are needed. An unknown message type is an
    /// error and leaves `src` untouched.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let type_byte = src[TYPE_OFFSET];
        let message_type =
            MessageType::from_u8(type_byte).ok_or(ProtocolError::UnknownMessageType(type_byte))?;

        let mut header = src.split_to(HEADER_SIZE);
        let request_id = RequestId::new(header.get_u32());
        header.advance(1);
        let payload_length = header.get_uint(LENGTH_BYTES) as u32;

        Ok(Some(Self::new(request_id, message_type, payload_length)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_big_endian() {
        let header = FrameHeader::new(RequestId::new(0x0102_0304), MessageType::Ping, 0x0A0B0C);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(
            &buf[..],
            &[1, 2, 3, 4, MessageType::Ping.as_u8(), 0x0A, 0x0B, 0x0C]
        );
        assert_eq!(FrameHeader::decode(&mut buf).unwrap(), Some(header));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_leaves_payload_bytes() {
        let header = FrameHeader::new(RequestId::new(5), MessageType::Ack, MAX_PAYLOAD_SIZE as u32);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.extend_from_slice(b"rest");

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload_length, MAX_PAYLOAD_SIZE as u32);
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn test_partial_header_waits() {
        let mut buf = BytesMut::from(&[0u8; HEADER_SIZE - 1][..]);
        assert!(FrameHeader::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE - 1);
    }

    #[test]
    fn test_unknown_type_consumes_nothing() {
        let mut buf = BytesMut::from(&[0, 0, 0, 1, 0xFE, 0, 0, 10][..]);
        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(ProtocolError::UnknownMessageType(0xFE))
        ));
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn test_request_id_next_skips_zero() {
        assert_eq!(RequestId::new(7).next(), RequestId::new(8));
        assert_eq!(RequestId::new(u32::MAX).next(), RequestId::new(1));
    }
}
