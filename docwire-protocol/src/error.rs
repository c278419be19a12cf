//! Protocol error types.

use crate::header::OpCode;
use thiserror::Error;

/// Protocol-level errors that can occur while framing or parsing messages.
///
/// Any of these observed on a live connection means the byte stream can no
/// longer be trusted; the client closes the socket before surfacing them.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown opcode: {0}")]
    UnknownOpCode(i32),

    #[error("unexpected opcode: expected {expected:?}, got {actual:?}")]
    UnexpectedOpCode { expected: OpCode, actual: OpCode },

    #[error("reply is for request {actual}, expected {expected}")]
    ResponseToMismatch { expected: i32, actual: i32 },

    #[error("message declared {declared} bytes but decoding required {required}")]
    LengthMismatch { declared: usize, required: usize },

    #[error("invalid message length: {0}")]
    InvalidMessageLength(i32),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("truncated message body: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("invalid C string: missing terminator or interior NUL")]
    InvalidCString,

    #[error("document error: {0}")]
    Document(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bson::ser::Error> for ProtocolError {
    fn from(err: bson::ser::Error) -> Self {
        ProtocolError::Document(err.to_string())
    }
}

impl From<bson::de::Error> for ProtocolError {
    fn from(err: bson::de::Error) -> Self {
        ProtocolError::Document(err.to_string())
    }
}
