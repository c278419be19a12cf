//! Message header and opcodes.
//!
//! Every message, in both directions, starts with a 16 byte header of four
//! little-endian 32-bit integers:
//!
//! ```text
//! +----------------+------------+-------------+---------+
//! | message_length | request_id | response_to | op_code |
//! |    4 bytes     |  4 bytes   |   4 bytes   | 4 bytes |
//! +----------------+------------+-------------+---------+
//! ```
//!
//! `message_length` counts the whole message, header included.

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Wire opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl OpCode {
    pub fn from_i32(value: i32) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(OpCode::Reply),
            2001 => Ok(OpCode::Update),
            2002 => Ok(OpCode::Insert),
            2004 => Ok(OpCode::Query),
            2005 => Ok(OpCode::GetMore),
            2006 => Ok(OpCode::Delete),
            2007 => Ok(OpCode::KillCursors),
            other => Err(ProtocolError::UnknownOpCode(other)),
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns whether the server answers this opcode with a reply.
    pub fn expects_reply(self) -> bool {
        matches!(self, OpCode::Query | OpCode::GetMore)
    }
}

/// A parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message length, header included.
    pub message_length: i32,
    pub request_id: i32,
    /// Request id this message answers (0 for requests).
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.message_length);
        buf.put_i32_le(self.request_id);
        buf.put_i32_le(self.response_to);
        buf.put_i32_le(self.op_code.as_i32());
    }

    /// Decodes a header from the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }

        let field = |i: usize| i32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);

        let message_length = field(0);
        if message_length < HEADER_SIZE as i32 {
            return Err(ProtocolError::InvalidMessageLength(message_length));
        }

        Ok(Self {
            message_length,
            request_id: field(4),
            response_to: field(8),
            op_code: OpCode::from_i32(field(12))?,
        })
    }

    /// Length of the body following the header.
    pub fn body_len(&self) -> usize {
        (self.message_length as usize).saturating_sub(HEADER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = MessageHeader {
            message_length: 36,
            request_id: 7,
            response_to: 0,
            op_code: OpCode::Query,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[0..4], &[36, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[7, 0, 0, 0]);
        assert_eq!(&buf[12..16], &2004i32.to_le_bytes());

        let decoded = MessageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.body_len(), 20);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(16);
        buf.put_i32_le(1);
        buf.put_i32_le(0);
        buf.put_i32_le(2013);
        let result = MessageHeader::decode(&buf);
        assert!(matches!(result, Err(ProtocolError::UnknownOpCode(2013))));
    }

    #[test]
    fn test_length_smaller_than_header() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(4);
        buf.put_i32_le(1);
        buf.put_i32_le(0);
        buf.put_i32_le(1);
        let result = MessageHeader::decode(&buf);
        assert!(matches!(result, Err(ProtocolError::InvalidMessageLength(4))));
    }

    #[test]
    fn test_short_header() {
        let result = MessageHeader::decode(&[0u8; 10]);
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                needed: 16,
                available: 10
            })
        ));
    }

    #[test]
    fn test_expects_reply() {
        assert!(OpCode::Query.expects_reply());
        assert!(OpCode::GetMore.expects_reply());
        assert!(!OpCode::Insert.expects_reply());
        assert!(!OpCode::KillCursors.expects_reply());
    }
}
